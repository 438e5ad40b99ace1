pub mod paths;
pub mod process;
pub mod scanner;
