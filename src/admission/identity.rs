//! Caller identity extraction.
//!
//! A caller is identified by, in order of preference, an authenticated
//! subject set by trusted code, the client address reported by a trusted
//! reverse proxy, or the network peer address. Client-supplied forwarding
//! headers are never trusted on their own.

use std::fmt;
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;

/// Facts about an inbound request that bear on who sent it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Address of the directly connected peer
    pub peer_addr: Option<IpAddr>,
    /// Raw `X-Forwarded-For` value, all header lines joined with `,`
    pub forwarded_for: Option<String>,
    /// Authenticated subject established upstream, e.g. a verified user id
    pub subject: Option<String>,
}

impl RequestContext {
    /// Context for a request from a directly connected peer.
    pub fn from_peer(peer_addr: IpAddr) -> Self {
        Self {
            peer_addr: Some(peer_addr),
            ..Self::default()
        }
    }

    /// Context for an authenticated request.
    pub fn from_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            ..Self::default()
        }
    }

    /// Attach a forwarded-for header value.
    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    /// Attach an authenticated subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Stable caller identity used as the first half of a window key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Authenticated subject identifier
    Subject(String),
    /// Client network address
    Address(IpAddr),
    /// Shared low-priority bucket for callers that could not be identified
    Anonymous,
}

impl Identity {
    /// String form used as a store key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Subject(subject) => write!(f, "sub:{}", subject),
            Identity::Address(addr) => write!(f, "ip:{}", addr),
            Identity::Anonymous => f.write_str("anonymous"),
        }
    }
}

/// Why a caller could not be identified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Neither a subject nor a peer address was available
    #[error("no caller identity available")]
    Missing,
    /// A trusted proxy forwarded the request without a usable client address
    #[error("trusted proxy {proxy} sent no usable forwarded address")]
    Ambiguous { proxy: IpAddr },
}

/// Derives caller identities from request contexts.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    trusted_proxies: Vec<IpAddr>,
}

impl IdentityResolver {
    /// Create a resolver that honours forwarding headers from `trusted_proxies`.
    pub fn new(trusted_proxies: Vec<IpAddr>) -> Self {
        Self { trusted_proxies }
    }

    /// Whether `addr` is one of the configured reverse proxies.
    pub fn is_trusted_proxy(&self, addr: &IpAddr) -> bool {
        self.trusted_proxies.contains(addr)
    }

    /// Resolve the identity of the caller described by `ctx`.
    pub fn resolve(&self, ctx: &RequestContext) -> Result<Identity, IdentityError> {
        if let Some(subject) = ctx.subject.as_deref().map(str::trim) {
            if !subject.is_empty() {
                return Ok(Identity::Subject(subject.to_string()));
            }
        }

        let peer = ctx.peer_addr.ok_or(IdentityError::Missing)?;

        if self.is_trusted_proxy(&peer) {
            return ctx
                .forwarded_for
                .as_deref()
                .and_then(|value| self.client_from_forwarded(value))
                .map(Identity::Address)
                .ok_or(IdentityError::Ambiguous { proxy: peer });
        }

        if ctx.forwarded_for.is_some() {
            debug!(peer = %peer, "Ignoring forwarded header from untrusted peer");
        }
        Ok(Identity::Address(peer))
    }

    /// Nearest untrusted hop in an `X-Forwarded-For` list.
    ///
    /// Proxies append the address they received the request from, so only
    /// the right-hand entries written by trusted proxies are reliable.
    /// Anything left of the first untrusted hop was supplied by the client.
    fn client_from_forwarded(&self, value: &str) -> Option<IpAddr> {
        for hop in value.rsplit(',') {
            let addr: IpAddr = hop.trim().parse().ok()?;
            if !self.is_trusted_proxy(&addr) {
                return Some(addr);
            }
        }
        None
    }
}
