//! # Network Link Status
//!
//! Connectivity collaborator consulted before every network step.

#[cfg(test)]
use mockall::automock;

/// Reports whether the uplink network is usable right now
#[cfg_attr(test, automock)]
pub trait Connectivity: Send {
    fn is_connected(&self) -> bool;
}

/// Link for hosts where the OS manages connectivity
///
/// Always reports connected; genuine outages surface as HTTP failures and
/// take the normal retry path.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeOnline;

impl Connectivity for AssumeOnline {
    fn is_connected(&self) -> bool {
        true
    }
}
