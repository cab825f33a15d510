//! Name resolution against the directory server.

use crate::core::{
    ErrorKind, InternalName, ServerAddr, Status, human_candidates, parse_name,
};
use crate::proto::{Op, Reply};

use super::{ClientError, GdpClient, unexpected};

impl GdpClient {
    fn directory_call(&self, what: &'static str, op: Op) -> Result<Reply, ClientError> {
        let router = self.config().router.clone();
        self.with_retry(what, || {
            let lease = self.pool().acquire(&router)?;
            self.call(&lease, None, op.clone())
        })
    }

    /// Address of the server hosting `name`. The first registered address
    /// is the primary.
    pub fn resolve(&self, name: &InternalName) -> Result<ServerAddr, ClientError> {
        match self.directory_call("resolve", Op::Resolve { name: *name })? {
            Reply::Resolved { addrs } => addrs
                .into_iter()
                .next()
                .ok_or_else(|| Status::not_found(format!("{name} has no location")).into()),
            reply => Err(unexpected("RESOLVE", reply)),
        }
    }

    /// Every registered address for `name`.
    pub fn resolve_all(&self, name: &InternalName) -> Result<Vec<ServerAddr>, ClientError> {
        match self.directory_call("resolve", Op::Resolve { name: *name })? {
            Reply::Resolved { addrs } => Ok(addrs),
            reply => Err(unexpected("RESOLVE", reply)),
        }
    }

    pub fn register(
        &self,
        name: &InternalName,
        addr: &ServerAddr,
        human: Option<&str>,
    ) -> Result<(), ClientError> {
        let op = Op::Register {
            name: *name,
            addr: addr.clone(),
            human: human.map(str::to_owned),
        };
        match self.directory_call("register", op)? {
            Reply::Done => Ok(()),
            reply => Err(unexpected("REGISTER", reply)),
        }
    }

    pub fn unregister(&self, name: &InternalName, addr: &ServerAddr) -> Result<(), ClientError> {
        let op = Op::Unregister {
            name: *name,
            addr: addr.clone(),
        };
        match self.directory_call("unregister", op)? {
            Reply::Done => Ok(()),
            reply => Err(unexpected("UNREGISTER", reply)),
        }
    }

    /// Directory lookup of one exact human-oriented name.
    fn lookup_registered(&self, human: &str) -> Result<Option<InternalName>, ClientError> {
        match self.directory_call(
            "lookup",
            Op::LookupName {
                human: human.to_owned(),
            },
        )? {
            Reply::Name(name) => Ok(name),
            reply => Err(unexpected("LOOKUP_NAME", reply)),
        }
    }

    /// Map a human-oriented name to its internal name.
    ///
    /// Candidates are tried in order (rooted form first for undotted
    /// names); the first one the directory knows wins. Failing that, the
    /// first candidate is hashed.
    pub fn lookup_human(&self, human: &str) -> Result<InternalName, ClientError> {
        let candidates = human_candidates(human, self.config().name_root.as_deref());
        for candidate in &candidates {
            if let Some(name) = self.lookup_registered(candidate)? {
                tracing::debug!(human, candidate, %name, "human name resolved");
                return Ok(name);
            }
        }
        let fallback = candidates.first().map(String::as_str).unwrap_or(human);
        Ok(InternalName::from_human(fallback)?)
    }

    pub fn reverse_lookup(&self, name: &InternalName) -> Result<Option<String>, ClientError> {
        match self.directory_call("reverse", Op::ReverseName { name: *name })? {
            Reply::HumanName(human) => Ok(human),
            reply => Err(unexpected("REVERSE_NAME", reply)),
        }
    }

    /// Parse a printable name, falling back to human-name lookup.
    pub fn parse_external(&self, external: &str) -> Result<InternalName, ClientError> {
        match parse_name(external) {
            Ok(name) => Ok(name),
            Err(err) if err.kind() == ErrorKind::BadNameSyntax => self.lookup_human(external),
            Err(err) => Err(err.into()),
        }
    }
}
