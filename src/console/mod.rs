// Console module - THE OPERATOR
// Text menu that drives a node: connect, create, list, show wallet, exit

mod menu;

pub use menu::{Console, ConsoleError, MenuChoice};
