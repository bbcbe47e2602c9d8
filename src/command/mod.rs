//! Building the command line a remote job runs.
//!
//! - [`CommandTemplate`]: wraps a payload in the remote harness invocation
//! - [`forward::forwardable_options`]: filters the parent's options before
//!   they are handed to child jobs

pub mod forward;
pub mod template;

pub use forward::forwardable_options;
pub use template::CommandTemplate;

/// Quote `word` for a POSIX shell unless it is made only of safe characters.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
