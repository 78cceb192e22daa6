//! Shared helpers.
//!
//! - **URL validation**: refuses non-http(s), loopback and private-network
//!   feed URLs before they are tracked
//! - **Text processing**: control-character stripping for feed text and the
//!   keyword [`Tokenizer`] used to build each podcast's search text
//!
//! # Examples
//!
//! ```
//! use podcrawl::util::{StopwordTokenizer, Tokenizer};
//!
//! let tokens = StopwordTokenizer::new().tokenize("en", "<b>Deep Space</b> news, episode 4");
//! assert_eq!(tokens, vec!["deep", "space"]);
//! ```

mod text;
mod url_validator;

pub use text::{clean_text, strip_control_chars, StopwordTokenizer, Tokenizer};
pub use url_validator::{validate_feed_url, UrlValidationError};
