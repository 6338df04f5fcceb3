//! kubestrap - bootstrap bare-metal Kubernetes clusters over SSH
//!
//! A manifest names the cluster and an ordered roster of machines. The
//! provisioner partitions the roster, then drives it through prerequisites,
//! control-plane init and joins, worker joins, HA load balancing, CNI and
//! fleet registration, one phase at a time.

pub mod cli;
pub mod manifest;
pub mod provision;
pub mod remote;
pub mod report;
