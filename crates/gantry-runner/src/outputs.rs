//! Parsing of the `$GANTRY_OUTPUT` file.

use gantry_core::run::JobOutput;

/// Parse `key=value` lines. A `key<<DELIM` line starts a multi-line value
/// that runs until a line equal to `DELIM`. Later keys overwrite earlier
/// ones.
pub fn parse_outputs(content: &str) -> JobOutput {
    let mut outputs = JobOutput::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some((key, delimiter)) = line.split_once("<<")
            && !key.contains('=')
        {
            let delimiter = delimiter.trim();
            let mut value = Vec::new();
            for body in lines.by_ref() {
                if body == delimiter {
                    break;
                }
                value.push(body);
            }
            let key = key.trim();
            if !key.is_empty() {
                outputs.insert(key, value.join("\n"));
            }
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                outputs.insert(key, value.trim());
            }
        }
    }

    outputs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_lines() {
        let out = parse_outputs("image=ghcr.io/org/repo:sha-abc123\n\nbad line\ndigest = sha256:1\n");
        assert_eq!(out.get("image"), Some("ghcr.io/org/repo:sha-abc123"));
        assert_eq!(out.get("digest"), Some("sha256:1"));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_heredoc_value() {
        let out = parse_outputs("notes<<EOF\nline one\nline=two\nEOF\nafter=1\n");
        assert_eq!(out.get("notes"), Some("line one\nline=two"));
        assert_eq!(out.get("after"), Some("1"));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let out = parse_outputs("query=a=b\n");
        assert_eq!(out.get("query"), Some("a=b"));
    }
}
