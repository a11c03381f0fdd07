//! # Source Context
//!
//! Maps documentation pages to the source-code files and folders they
//! describe, so stale docs can be flagged and docs can link to code.
//!
//! Three strategies cooperate, all working from one in-memory snapshot of
//! the project tree:
//!
//! - **Convention rules** match the page path and resolve source patterns
//!   such as `src/storage/`.
//! - **Keywords** from the page title, headings and relative imports are
//!   matched against candidate file paths.
//! - **An LLM agent** browses the snapshot with read-only tools and answers
//!   with a JSON verdict. It is used when a provider is configured and
//!   available; a `low` verdict falls back to the rules.
//!
//! ```text
//! ┌──────────┐   ┌────────────────────────┐   ┌─────────────┐
//! │  Page    │──▶│    ContextDetector     │──▶│  Detection  │
//! │ (md/mdx) │   │ agent ─▶ rules+keywords│   │   result    │
//! └──────────┘   └───────────┬────────────┘   └─────────────┘
//!                            │
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//!        ┌──────────┐               ┌─────────────┐
//!        │ Response │               │ BatchRunner │──▶ JobQueue (polled)
//!        │  cache   │               └─────────────┘
//!        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`file_tree`] | Project snapshot builder |
//! | [`document`] | Front matter and title parsing |
//! | [`keywords`] | Keyword extraction and path matching |
//! | [`rules`] | Convention rules |
//! | [`tools`] | Read-only tools for the agent |
//! | [`llm`] | Chat messages, `ChatModel` trait, OpenAI-compatible client |
//! | [`agent`] | Agentic detector loop |
//! | [`cache`] | Agent response cache |
//! | [`detect`] | Detection orchestrator service |
//! | [`jobs`] | Batch job store |
//! | [`batch`] | Background batch runner |
//! | [`progress`] | CLI batch progress reporting |
//! | [`server`] | HTTP server |

pub mod agent;
pub mod batch;
pub mod cache;
pub mod config;
pub mod detect;
pub mod document;
pub mod file_tree;
pub mod jobs;
pub mod keywords;
pub mod llm;
pub mod models;
pub mod progress;
pub mod rules;
pub mod server;
pub mod tools;
