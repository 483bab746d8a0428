//! Acquire ASF streams over HTTP or MMS and buffer them ahead of the consumer.
//!
//! ```text
//!  "mms://host/file"
//!          │ Url::parse
//!  ┌───────▼───────┐   3xx Location
//!  │  Negotiator   ◄──────────────────┐
//!  └──┬─────┬────┬─┘                  │
//!     │     │    └───────────┐        │
//!     │HTTP │UDP (stub)      │TCP     │
//!  ┌──▼─────┴──────┐  ┌──────▼──────┐ │
//!  │ AsfHttpStream ├──┼─────────────┼─┘
//!  │  PlainStream  │  │ MmstSession │
//!  └──────┬────────┘  └──────┬──────┘
//!         └──────┬───────────┘
//!                │ Upstream::read / reseek
//!       ┌────────▼────────┐
//!       │ ReadAheadCache  │  filler task ─► ring ─► drainer
//!       └────────┬────────┘
//!                │ read / seek
//!       ┌────────▼────────┐
//!       │   MediaStream   ├──► demuxer
//!       └─────────────────┘
//! ```

pub mod asf;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod mmst;
pub mod negotiate;
pub mod net;
pub mod source;
pub mod stream;
pub mod url;

pub use config::{CacheConfig, StreamConfig};
pub use error::{MmsError, MmsResult};
pub use source::{StreamInfo, StreamType, Transport, Upstream};
pub use stream::{open, BlockingStream, MediaStream};
pub use url::Url;
