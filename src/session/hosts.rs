//! Connect string parsing and server rotation.

use rand::seq::SliceRandom;

use crate::error::{Result, ZkError};
use crate::path::validate_path;

/// Parsed `host:port[,host:port...][/chroot]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectString {
    pub hosts: Vec<String>,
    /// Prefix for every path, without a trailing `/`. `None` for the root.
    pub chroot: Option<String>,
}

impl ConnectString {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (host_part, chroot) = match input.find('/') {
            Some(idx) => {
                let root = &input[idx..];
                validate_path(root, false)?;
                let chroot = if root == "/" { None } else { Some(root.to_string()) };
                (&input[..idx], chroot)
            }
            None => (input, None),
        };

        let mut hosts = Vec::new();
        for host in host_part.split(',').map(str::trim).filter(|h| !h.is_empty()) {
            let valid_port = host
                .rsplit_once(':')
                .is_some_and(|(name, port)| !name.is_empty() && port.parse::<u16>().is_ok());
            if !valid_port {
                return Err(ZkError::BadArguments(format!(
                    "Expected host:port in connect string, got {:?}",
                    host
                )));
            }
            hosts.push(host.to_string());
        }
        if hosts.is_empty() {
            return Err(ZkError::BadArguments(format!(
                "No hosts in connect string {:?}",
                input
            )));
        }

        Ok(Self { hosts, chroot })
    }
}

/// Hands out servers round-robin after one initial shuffle.
#[derive(Debug)]
pub(crate) struct HostProvider {
    hosts: Vec<String>,
    next: usize,
}

impl HostProvider {
    pub fn new(mut hosts: Vec<String>) -> Self {
        hosts.shuffle(&mut rand::thread_rng());
        Self { hosts, next: 0 }
    }

    pub fn next_host(&mut self) -> &str {
        let idx = self.next % self.hosts.len();
        self.next = (idx + 1) % self.hosts.len();
        &self.hosts[idx]
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_hosts_and_chroot() {
        let parsed = ConnectString::parse("a:2181, b:2182/app/x").unwrap();
        assert_eq!(parsed.hosts, vec!["a:2181", "b:2182"]);
        assert_eq!(parsed.chroot.as_deref(), Some("/app/x"));

        let plain = ConnectString::parse("127.0.0.1:2181/").unwrap();
        assert_eq!(plain.chroot, None);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for bad in ["", "host", "host:port", ":2181", "a:1/bad/", "a:1//x"] {
            assert!(ConnectString::parse(bad).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn test_rotation_visits_every_host() {
        let hosts: Vec<String> = (0..5).map(|i| format!("h{}:1", i)).collect();
        let mut provider = HostProvider::new(hosts.clone());
        assert_eq!(provider.len(), 5);

        let first_round: Vec<String> = (0..5).map(|_| provider.next_host().to_string()).collect();
        let seen: HashSet<_> = first_round.iter().cloned().collect();
        assert_eq!(seen.len(), 5);

        let second_round: Vec<String> = (0..5).map(|_| provider.next_host().to_string()).collect();
        assert_eq!(first_round, second_round);
    }
}
