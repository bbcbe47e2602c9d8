/// Flags dropped outright when the parent's options are forwarded.
const DROPPED_FLAGS: &[&str] = &[
    "-h",
    "--help",
    "-w",
    "--wait",
    "-d",
    "--debug",
    "-c",
    "--continue",
    "--exec_remote",
    "--add",
    "--clear",
];

/// Flags dropped together with the value that follows them.
const DROPPED_WITH_VALUE: &[&str] = &["--id"];

/// Selectors whose value is replaced by a wildcard so each child can pick
/// its own target/environment.
const WILDCARDED: &[&str] = &["-t", "--target", "-e", "--environment"];

const WILDCARD: &str = "'*'";

/// Filter the options string that launched this process so it can be passed
/// on to distributed child jobs.
pub fn forwardable_options(parent: &str) -> String {
    let mut kept: Vec<String> = Vec::new();
    let mut tokens = parent.split_whitespace();

    while let Some(token) = tokens.next() {
        let (flag, inline_value) = match token.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value)),
            _ => (token, None),
        };

        if DROPPED_FLAGS.contains(&flag) {
            continue;
        }
        if DROPPED_WITH_VALUE.contains(&flag) {
            if inline_value.is_none() {
                tokens.next();
            }
            continue;
        }
        if WILDCARDED.contains(&flag) {
            match inline_value {
                Some(_) => kept.push(format!("{}={}", flag, WILDCARD)),
                None => {
                    tokens.next();
                    kept.push(flag.to_string());
                    kept.push(WILDCARD.to_string());
                }
            }
            continue;
        }
        kept.push(token.to_string());
    }

    kept.join(" ")
}
