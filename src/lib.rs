pub mod config;
pub mod error;
pub mod ident;
pub mod identity;
pub mod server;
pub mod upstream;
pub mod vcard;
