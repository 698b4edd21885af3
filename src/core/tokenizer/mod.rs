pub mod traits;
pub mod template;
pub mod hf;

pub use traits::{Message, Role, Tokenizer};
pub use template::ChatTemplate;
pub use hf::HfTokenizer;
