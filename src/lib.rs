pub mod directory;
pub mod fetch;
pub mod model;
pub mod node;
pub mod parser;
pub mod source;
