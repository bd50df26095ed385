use control_panel::{FormData, SelectedFile};
use std::path::{Path, PathBuf};

/// `<module> <action>` arguments after the names: `--id <id>`, `--file <input>=<path>`, `key=value`.
#[derive(Debug, Default, PartialEq)]
pub struct ActionArgs {
    pub id: Option<String>,
    pub files: Vec<(String, PathBuf)>,
    pub form: FormData,
}

pub fn parse_action_args(args: &[String]) -> Result<ActionArgs, String> {
    let mut parsed = ActionArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--id" => {
                let id = iter.next().ok_or("--id needs a value")?;
                parsed.id = Some(id.clone());
            }
            "--file" => {
                let file_arg = iter.next().ok_or("--file needs <input>=<path>")?;
                let (input, path) = file_arg
                    .split_once('=')
                    .filter(|(input, path)| !input.is_empty() && !path.is_empty())
                    .ok_or_else(|| format!("invalid file argument: {}", file_arg))?;
                parsed.files.push((input.to_string(), PathBuf::from(path)));
            }
            _ => {
                let (key, value) = arg
                    .split_once('=')
                    .filter(|(key, _)| !key.is_empty())
                    .ok_or_else(|| format!("expected key=value, got: {}", arg))?;
                parsed.form.set(key, value);
            }
        }
    }
    Ok(parsed)
}

fn guess_mime(path: &Path) -> &'static str {
    let name = path.to_string_lossy().to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".gz") {
        "application/gzip"
    } else if name.ends_with(".bin") || name.ends_with(".img") {
        "application/octet-stream"
    } else if name.ends_with(".txt") || name.ends_with(".pub") {
        "text/plain"
    } else {
        ""
    }
}

pub fn read_selected_file(path: &Path) -> Result<SelectedFile, String> {
    let bytes = std::fs::read(path).map_err(|err| format!("read {} failed: {}", path.display(), err))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SelectedFile {
        name,
        mime: guess_mime(path).to_string(),
        bytes,
    })
}

/// Shell-ish split that keeps double-quoted words together.
pub fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut has_word = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                has_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if has_word {
                    words.push(std::mem::take(&mut current));
                    has_word = false;
                }
            }
            c => {
                current.push(c);
                has_word = true;
            }
        }
    }
    if has_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_action_args() {
        let parsed = parse_action_args(&strings(&[
            "--id",
            "cfg0a1b2c",
            "name=Web",
            "dest_ip=192.168.1.10",
            "--file",
            "firmware-file=/tmp/fw.bin",
        ]))
        .unwrap();
        assert_eq!(parsed.id.as_deref(), Some("cfg0a1b2c"));
        assert_eq!(parsed.form.get("dest_ip"), Some("192.168.1.10"));
        assert_eq!(parsed.files, vec![("firmware-file".to_string(), PathBuf::from("/tmp/fw.bin"))]);

        // values may contain '='
        let parsed = parse_action_args(&strings(&["command=echo a=b"])).unwrap();
        assert_eq!(parsed.form.get("command"), Some("echo a=b"));

        assert!(parse_action_args(&strings(&["--id"])).is_err());
        assert!(parse_action_args(&strings(&["oops"])).is_err());
        assert!(parse_action_args(&strings(&["--file", "=x"])).is_err());
    }

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words(r#"do system save-cron command="/usr/bin/backup --all"  minute=0"#),
            strings(&["do", "system", "save-cron", "command=/usr/bin/backup --all", "minute=0"])
        );
        assert_eq!(split_words(r#"do network ping host="""#), strings(&["do", "network", "ping", "host="]));
        assert!(split_words("   ").is_empty());
    }

    #[test]
    fn test_read_selected_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup-OpenWrt-2024-01-01.tar.gz");
        std::fs::write(&path, b"\x1f\x8b").unwrap();
        let file = read_selected_file(&path).unwrap();
        assert_eq!(file.name, "backup-OpenWrt-2024-01-01.tar.gz");
        assert_eq!(file.mime, "application/gzip");
        assert_eq!(file.bytes, b"\x1f\x8b".to_vec());
        assert!(read_selected_file(&dir.path().join("missing")).is_err());
    }
}
