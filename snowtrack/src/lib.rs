#![cfg_attr(not(test), no_std)]

#[macro_use]
mod logging;

/// modules
pub mod acquisition;
pub mod command;
pub mod err;
pub mod hub;
pub mod link;
pub mod lossy;
pub mod orientation;
pub mod shtp;

#[cfg(test)]
mod testing;
