//! The command line front end of a virtual network node.

pub mod cli;
pub mod command;
pub mod lnx;
pub mod repl;
