use std::collections::HashMap;

use crate::backend::BackendKind;

/// Provisioning scripts keyed by `"<provider>:<distro>:<distroVersion>"`.
///
/// Script bodies are opaque to the orchestrator: each one unpacks
/// `/root/installer.tgz` and installs the server on a fresh build instance.
#[derive(Debug, Clone, Default)]
pub struct ScriptTable {
    scripts: HashMap<String, String>,
}

pub fn script_key(provider: BackendKind, distro: &str, distro_version: &str) -> String {
    format!("{}:{}:{}", provider, distro, distro_version)
}

const EARLY_LATE_HOOKS: &str = r#"cat <<'EOF' > /usr/local/bin/early.sh
#!/bin/bash
ls / >/dev/null 2>&1
EOF
cat <<'EOF' > /usr/local/bin/late.sh
#!/bin/bash
ls / >/dev/null 2>&1
EOF
chmod 755 /usr/local/bin/early.sh /usr/local/bin/late.sh
"#;

const SYSTEMD_HOOKS: &str = r#"mkdir -p /etc/systemd/system/aerospike.service.d
cat <<'EOF' > /etc/systemd/system/aerospike.service.d/early-late.conf
[Service]
ExecStartPre=/bin/bash /usr/local/bin/early.sh
ExecStopPost=/bin/bash /usr/local/bin/late.sh
EOF
systemctl daemon-reload
"#;

const APT_INSTALL: &str = r#"export DEBIAN_FRONTEND=noninteractive
apt-get update || exit 1
apt-get -y install python3 libcurl4 ldap-utils iproute2 iptables dnsutils net-tools less vim || exit 1
cd /root && tar -zxf installer.tgz || exit 1
cd aerospike-server-* && ./asinstall || exit 1
"#;

const YUM_INSTALL: &str = r#"yum -y install python3 libcurl openldap-clients iproute iptables bind-utils net-tools less vim which || exit 1
cd /root && tar -zxf installer.tgz || exit 1
cd aerospike-server-* && ./asinstall || exit 1
"#;

impl ScriptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the scripts shipped for every supported provider and distro
    pub fn builtin() -> Self {
        let mut table = Self::new();
        let apt = [
            ("ubuntu", "24.04"),
            ("ubuntu", "22.04"),
            ("ubuntu", "20.04"),
            ("debian", "12"),
            ("debian", "11"),
        ];
        let yum = [
            ("centos", "7"),
            ("rocky", "8"),
            ("rocky", "9"),
            ("amazon", "2023"),
        ];

        for provider in [BackendKind::Docker, BackendKind::Aws, BackendKind::Gcp] {
            let hooks = match provider {
                BackendKind::Docker => String::new(),
                _ => SYSTEMD_HOOKS.to_string(),
            };
            for (distro, version) in apt {
                table.insert(
                    script_key(provider, distro, version),
                    format!("#!/bin/bash\n{}{}{}", EARLY_LATE_HOOKS, hooks, APT_INSTALL),
                );
            }
            for (distro, version) in yum {
                table.insert(
                    script_key(provider, distro, version),
                    format!("#!/bin/bash\n{}{}{}", EARLY_LATE_HOOKS, hooks, YUM_INSTALL),
                );
            }
        }
        table
    }

    pub fn insert(&mut self, key: impl Into<String>, script: impl Into<String>) {
        self.scripts.insert(key.into(), script.into());
    }

    pub fn lookup(&self, provider: BackendKind, distro: &str, distro_version: &str) -> Option<&str> {
        self.scripts
            .get(&script_key(provider, distro, distro_version))
            .map(String::as_str)
    }
}
