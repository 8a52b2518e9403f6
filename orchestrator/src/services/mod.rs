pub mod deployer;
pub mod fix_mesh;
pub mod lifecycle;
pub mod xdr_connect;

pub use deployer::{ClusterDeployer, ClusterSpec, DeployReport, DeployState};
pub use fix_mesh::{fix_mesh, FixMeshReport};
pub use lifecycle::{ClusterLifecycle, ClusterSummary};
pub use xdr_connect::{XdrConnectRequest, XdrConnector};
