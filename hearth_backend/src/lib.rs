pub mod affect;
pub mod agent;
pub mod composer;
pub mod config;
pub mod glyphs;
pub mod http_client;
pub mod lexicon;
pub mod memory;
pub mod patterns;
pub mod persistence;
pub mod responder;
pub mod runtime;
pub mod server;
pub mod session;
