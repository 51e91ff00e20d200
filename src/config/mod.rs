use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&default_config_path())
    }

    /// Defaults, then the rc file at `path`, then the environment.
    pub fn load_from(path: &Path) -> Self {
        let mut map = default_map();

        // Read .snipconrc if exists
        if let Ok(file) = fs::File::open(path) {
            let reader = BufReader::new(file);
            for line in reader.lines().map_while(Result::ok) {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((k, v)) = line.split_once('=') {
                    map.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self {
            inner: map,
            config_path: path.to_path_buf(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    pub fn session_path(&self) -> PathBuf {
        self.get_path("SESSION_PATH")
            .unwrap_or_else(|| env::temp_dir().join("snipcon").join("sessions"))
    }

    pub fn backup_length(&self) -> usize {
        self.get_usize("BACKUP_LENGTH").unwrap_or(20)
    }

    pub fn figure_size(&self) -> (u32, u32) {
        let dim = |key: &str, fallback: u32| {
            self.get(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| (16..=4096).contains(v))
                .unwrap_or(fallback)
        };
        (dim("FIGURE_WIDTH", 640), dim("FIGURE_HEIGHT", 480))
    }
}

fn is_config_key(k: &str) -> bool {
    // Accept known keys or SNIPCON_* for forward-compat
    const KEYS: &[&str] = &[
        "SESSION_PATH",
        "BACKUP_LENGTH",
        "INJECT_LIBRARIES",
        "REPR_LIMIT",
        "TRACEBACK_LIMIT",
        "FIGURE_WIDTH",
        "FIGURE_HEIGHT",
        "DEFAULT_COLOR",
        "PRETTIFY_MARKDOWN",
        "LOG_LEVEL",
    ];

    KEYS.contains(&k) || k.starts_with("SNIPCON_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("snipcon").join(".snipconrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    // Paths
    let base = BaseDirs::new()
        .map(|b| b.data_local_dir().to_path_buf())
        .unwrap_or_else(env::temp_dir);
    m.insert(
        "SESSION_PATH".into(),
        base.join("snipcon").join("sessions").to_string_lossy().into_owned(),
    );

    // Numbers
    m.insert("BACKUP_LENGTH".into(), "20".into());
    m.insert("REPR_LIMIT".into(), "100".into());
    m.insert("TRACEBACK_LIMIT".into(), "20".into());
    m.insert("FIGURE_WIDTH".into(), "640".into());
    m.insert("FIGURE_HEIGHT".into(), "480".into());

    // Strings
    m.insert("DEFAULT_COLOR".into(), "green".into());
    m.insert("LOG_LEVEL".into(), "warn".into());

    // Bools as strings
    m.insert("INJECT_LIBRARIES".into(), "true".into());
    m.insert("PRETTIFY_MARKDOWN".into(), "true".into());

    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rc_file_overrides_defaults() {
        let mut rc = tempfile::NamedTempFile::new().unwrap();
        writeln!(rc, "# comment").unwrap();
        writeln!(rc, "REPR_LIMIT = 12").unwrap();
        writeln!(rc, "FIGURE_WIDTH=320").unwrap();
        let cfg = Config::load_from(rc.path());
        assert_eq!(cfg.get_usize("REPR_LIMIT"), Some(12));
        assert_eq!(cfg.figure_size().0, 320);
        assert!(cfg.get_bool("INJECT_LIBRARIES"));
    }

    #[test]
    fn nonsense_figure_size_falls_back() {
        let mut cfg = Config::load_from(Path::new("/nonexistent/.snipconrc"));
        cfg.set("FIGURE_HEIGHT", "0");
        assert_eq!(cfg.figure_size().1, 480);
    }
}
