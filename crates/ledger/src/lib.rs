//! Durable storage for Fancast.
//!
//! SQLite-backed stores sharing one connection: the forward [`Ledger`]
//! (authoritative record of every forward attempt), the [`Directory`]
//! (channels, users, memberships, operators) and the [`SessionRepo`]
//! (session identities and quarantine state).

pub mod db;
pub mod directory;
pub mod forwards;
pub mod sessions;

pub use db::Db;
pub use directory::Directory;
pub use forwards::{Ledger, LedgerStats, StatsFilter};
pub use sessions::SessionRepo;
