//! This module contains various tools that help the ergonomics of this crate.

pub(crate) mod logging;
mod persistent;

pub(crate) use persistent::PersistentList;
pub(crate) use persistent::PersistentStack;
