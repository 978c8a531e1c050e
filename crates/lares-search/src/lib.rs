//! Lares Search - web search and scrape provider
//!
//! Wraps an MCP-style tool server behind the `SearchProvider` trait:
//! - `search`: web search returning raw hits
//! - `scrape_markdown`: fetch one page as markdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod provider;

pub use error::{Error, Result};
pub use provider::{
    SearchConfig, SearchHit, SearchProvider, ToolServerClient, DEFAULT_TOOL_SERVER_URL,
};
