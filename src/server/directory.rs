//! Name directory: where logs live, and their human names.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::ServerError;
use crate::core::{InternalName, ServerAddr, Status};

#[derive(Default)]
struct DirectoryState {
    locations: HashMap<InternalName, Vec<ServerAddr>>,
    humans: HashMap<String, InternalName>,
    reverse: HashMap<InternalName, String>,
}

#[derive(Default)]
pub struct Directory {
    state: Mutex<DirectoryState>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, DirectoryState>, ServerError> {
        self.state
            .lock()
            .map_err(|_| ServerError::LockPoisoned("directory"))
    }

    /// Add `addr` as a location of `name`. The first registrant stays primary.
    pub fn register(
        &self,
        name: &InternalName,
        addr: &ServerAddr,
        human: Option<&str>,
    ) -> Result<(), ServerError> {
        let mut state = self.lock()?;
        let addrs = state.locations.entry(*name).or_default();
        if !addrs.contains(addr) {
            addrs.push(addr.clone());
        }
        if let Some(human) = human {
            state.humans.insert(human.to_owned(), *name);
            state.reverse.insert(*name, human.to_owned());
        }
        tracing::debug!(%name, %addr, human, "registered");
        Ok(())
    }

    /// Drop `addr` for `name`; the last address takes the human name with it.
    pub fn unregister(&self, name: &InternalName, addr: &ServerAddr) -> Result<(), ServerError> {
        let mut state = self.lock()?;
        let Some(addrs) = state.locations.get_mut(name) else {
            return Ok(());
        };
        addrs.retain(|a| a != addr);
        if addrs.is_empty() {
            state.locations.remove(name);
            if let Some(human) = state.reverse.remove(name) {
                state.humans.remove(&human);
            }
        }
        tracing::debug!(%name, %addr, "unregistered");
        Ok(())
    }

    pub fn resolve(&self, name: &InternalName) -> Result<Vec<ServerAddr>, ServerError> {
        let state = self.lock()?;
        match state.locations.get(name) {
            Some(addrs) if !addrs.is_empty() => Ok(addrs.clone()),
            _ => Err(Status::not_found(format!("{name} is not registered")).into()),
        }
    }

    pub fn lookup(&self, human: &str) -> Result<Option<InternalName>, ServerError> {
        Ok(self.lock()?.humans.get(human).copied())
    }

    pub fn reverse(&self, name: &InternalName) -> Result<Option<String>, ServerError> {
        Ok(self.lock()?.reverse.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[test]
    fn first_registrant_is_primary() {
        let dir = Directory::new();
        let name = InternalName::from_bytes([3; 32]);
        dir.register(&name, &ServerAddr::new("a:1"), None).unwrap();
        dir.register(&name, &ServerAddr::new("b:1"), None).unwrap();
        dir.register(&name, &ServerAddr::new("a:1"), None).unwrap();
        let addrs = dir.resolve(&name).unwrap();
        assert_eq!(addrs, vec![ServerAddr::new("a:1"), ServerAddr::new("b:1")]);
    }

    #[test]
    fn human_names_map_both_ways_until_last_unregister() {
        let dir = Directory::new();
        let name = InternalName::from_bytes([4; 32]);
        let addr = ServerAddr::new("a:1");
        dir.register(&name, &addr, Some("edu.example.log")).unwrap();
        assert_eq!(dir.lookup("edu.example.log").unwrap(), Some(name));
        assert_eq!(dir.reverse(&name).unwrap().as_deref(), Some("edu.example.log"));

        dir.unregister(&name, &addr).unwrap();
        assert_eq!(dir.lookup("edu.example.log").unwrap(), None);
        let err = dir.resolve(&name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
