//! Watch-compile loop.
//!
//! A [`ChangeSource`] yields paths of changed files. For every event that names a
//! matching file under the watched directory, the loop runs the standalone transform
//! (babel passes, then ES modules to CommonJS) and writes the result to the same
//! relative path under the output directory. A file that fails to compile is
//! reported and the loop moves on.

use std::{
    collections::{BTreeMap, VecDeque},
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, SystemTime},
};

use cow_utils::CowUtils;
use log::{debug, error, info, trace};
use walkdir::WalkDir;
use wax::{CandidatePath, Glob, Pattern};

use crate::{
    config::WatchConfig,
    error::{BuildError, BuildResult},
    output::write_atomic,
    transform::{Pipeline, Transform},
};

/// Producer of file change events
pub trait ChangeSource {
    /// Block until a file changes. `None` means the source is exhausted.
    fn next_change_event(&mut self) -> Option<PathBuf>;
}

/// Decides which files under the watched root take part
#[derive(Debug, Clone)]
pub struct FileMatcher {
    root: PathBuf,
    glob: Glob<'static>,
    /// Directory (relative to `root`) whose files are never reported
    excluded: Option<PathBuf>,
}

impl FileMatcher {
    pub fn new(root: &Path, pattern: &str, excluded: Option<&Path>) -> BuildResult<Self> {
        let glob = Glob::new(pattern)
            .map(Glob::into_owned)
            .map_err(|e| BuildError::config(format!("invalid watch pattern '{pattern}': {e}")))?;

        let excluded = excluded.and_then(|dir| {
            let root = std::path::absolute(root).ok()?;
            let dir = std::path::absolute(dir).ok()?;
            dir.strip_prefix(&root).ok().map(Path::to_path_buf)
        });
        if let Some(excluded) = &excluded {
            debug!("Ignoring changes under {}", excluded.display());
        }

        Ok(Self {
            root: root.to_path_buf(),
            glob,
            excluded,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check a path relative to the root
    pub fn matches(&self, relative: &Path) -> bool {
        if self.is_excluded(relative) {
            return false;
        }
        let relative = relative.to_string_lossy();
        let relative = relative.cow_replace('\\', "/");
        self.glob
            .matched(&CandidatePath::from(relative.as_ref()))
            .is_some()
    }

    fn is_excluded(&self, relative: &Path) -> bool {
        self.excluded
            .as_deref()
            .is_some_and(|excluded| !excluded.as_os_str().is_empty() && relative.starts_with(excluded))
    }

    /// Matching files with their modification times, in path order
    pub fn scan(&self) -> BTreeMap<PathBuf, SystemTime> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .map_or(true, |relative| !self.is_excluded(relative))
            })
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                if !self.matches(relative) {
                    return None;
                }
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((entry.path().to_path_buf(), modified))
            })
            .collect()
    }
}

/// File system [`ChangeSource`] that compares modification-time snapshots on an
/// interval. Deleted files produce no event.
#[derive(Debug)]
pub struct PollingWatcher {
    matcher: FileMatcher,
    interval: Duration,
    snapshot: BTreeMap<PathBuf, SystemTime>,
    pending: VecDeque<PathBuf>,
}

impl PollingWatcher {
    /// The current state of the tree is the baseline; only later changes are reported
    pub fn new(matcher: FileMatcher, interval: Duration) -> Self {
        let snapshot = matcher.scan();
        debug!(
            "Watching {} files under {}",
            snapshot.len(),
            matcher.root().display()
        );
        Self {
            matcher,
            interval,
            snapshot,
            pending: VecDeque::new(),
        }
    }

    /// Take a new snapshot and return the files that are new or were modified
    pub fn poll_once(&mut self) -> Vec<PathBuf> {
        let current = self.matcher.scan();
        let changed: Vec<PathBuf> = current
            .iter()
            .filter(|&(path, modified)| self.snapshot.get(path) != Some(modified))
            .map(|(path, _)| path.clone())
            .collect();
        self.snapshot = current;
        changed
    }
}

impl ChangeSource for PollingWatcher {
    fn next_change_event(&mut self) -> Option<PathBuf> {
        loop {
            if let Some(path) = self.pending.pop_front() {
                return Some(path);
            }
            thread::sleep(self.interval);
            let changed = self.poll_once();
            self.pending.extend(changed);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Transforming(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFailure {
    pub path: PathBuf,
    pub message: String,
}

/// What the loop has done so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchReport {
    /// Output files written, in order
    pub compiled: Vec<PathBuf>,
    pub failures: Vec<WatchFailure>,
}

#[derive(Debug)]
pub struct WatchLoop {
    matcher: FileMatcher,
    out_dir: PathBuf,
    interval: Duration,
    transform: Pipeline,
    state: WatchState,
    report: WatchReport,
}

impl WatchLoop {
    pub fn new(config: &WatchConfig) -> BuildResult<Self> {
        if !config.dir.is_dir() {
            return Err(BuildError::config(format!(
                "watch directory not found: {}",
                config.dir.display()
            )));
        }
        Ok(Self {
            matcher: FileMatcher::new(&config.dir, &config.pattern, Some(&config.out_dir))?,
            out_dir: config.out_dir.clone(),
            interval: config.interval,
            transform: Pipeline::standalone(&config.jsx),
            state: WatchState::Idle,
            report: WatchReport::default(),
        })
    }

    /// A polling watcher over the same files this loop compiles
    pub fn watcher(&self) -> PollingWatcher {
        PollingWatcher::new(self.matcher.clone(), self.interval)
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    pub fn report(&self) -> &WatchReport {
        &self.report
    }

    pub fn into_report(self) -> WatchReport {
        self.report
    }

    /// Compile every matching file once
    pub fn compile_all(&mut self) {
        let files: Vec<PathBuf> = self.matcher.scan().into_keys().collect();
        info!(
            "Compiling {} files from {}",
            files.len(),
            self.matcher.root().display()
        );
        for file in files {
            self.handle_event(&file);
        }
    }

    /// Process events until the source is exhausted
    pub fn run<S: ChangeSource + ?Sized>(&mut self, source: &mut S) {
        while let Some(path) = source.next_change_event() {
            self.handle_event(&path);
        }
        debug!("Change source exhausted");
    }

    /// Compile the file named by one change event. Paths may be relative to the
    /// watched root or include it.
    pub fn handle_event(&mut self, path: &Path) {
        let relative = match path.strip_prefix(&self.matcher.root) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) if path.is_relative() => path.to_path_buf(),
            Err(_) => {
                debug!("Ignoring change outside the watched directory: {}", path.display());
                return;
            }
        };
        if !self.matcher.matches(&relative) {
            trace!("Ignoring change to {}", relative.display());
            return;
        }
        let source = self.matcher.root.join(&relative);
        if !source.is_file() {
            debug!("Ignoring removed file {}", source.display());
            return;
        }

        self.state = WatchState::Transforming(source.clone());
        match self.compile_file(&source, &relative) {
            Ok(target) => {
                info!("{} -> {}", source.display(), target.display());
                self.report.compiled.push(target);
            }
            Err(err) => {
                error!("{err}");
                self.report.failures.push(WatchFailure {
                    path: source,
                    message: err.to_string(),
                });
            }
        }
        self.state = WatchState::Idle;
    }

    fn compile_file(&self, source: &Path, relative: &Path) -> BuildResult<PathBuf> {
        let text = fs::read_to_string(source).map_err(|e| BuildError::io(source, e))?;
        let output = self
            .transform
            .apply(&text)
            .map_err(|e| BuildError::transform(source, e))?;
        let target = self.out_dir.join(relative);
        write_atomic(&target, &output)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::transform::JsxOptions;

    fn create_test_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    fn touch_later(path: &Path) {
        let file = fs::File::options()
            .write(true)
            .open(path)
            .expect("open for touch");
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .expect("set mtime");
    }

    fn watch_config(root: &Path) -> WatchConfig {
        WatchConfig {
            dir: root.join("js"),
            out_dir: root.join("js/min"),
            pattern: "*.js".to_owned(),
            interval: Duration::from_millis(10),
            jsx: JsxOptions::default(),
        }
    }

    /// Replays a fixed list of events
    struct Scripted(VecDeque<PathBuf>);

    impl ChangeSource for Scripted {
        fn next_change_event(&mut self) -> Option<PathBuf> {
            self.0.pop_front()
        }
    }

    #[test]
    fn test_matcher_glob_and_exclusion() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        let flat = FileMatcher::new(root, "*.js", Some(&root.join("min"))).expect("matcher");
        assert!(flat.matches(Path::new("a.js")));
        assert!(!flat.matches(Path::new("a.css")));
        assert!(!flat.matches(Path::new("sub/a.js")));

        let deep = FileMatcher::new(root, "**/*.js", Some(&root.join("min"))).expect("matcher");
        assert!(deep.matches(Path::new("sub/a.js")));
        assert!(!deep.matches(Path::new("min/a.js")));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let err = FileMatcher::new(temp_dir.path(), "{a,b", None).expect_err("bad glob");
        assert!(err.is_config());
    }

    #[test]
    fn test_polling_watcher_reports_new_and_modified_files() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        create_test_file(&root.join("a.js"), "1");
        create_test_file(&root.join("b.js"), "2");
        create_test_file(&root.join("min/a.js"), "out");

        let matcher = FileMatcher::new(root, "**/*.js", Some(&root.join("min"))).expect("matcher");
        let mut watcher = PollingWatcher::new(matcher, Duration::from_millis(1));
        assert!(watcher.poll_once().is_empty());

        touch_later(&root.join("b.js"));
        create_test_file(&root.join("c.js"), "3");
        touch_later(&root.join("min/a.js"));
        assert_eq!(watcher.poll_once(), vec![root.join("b.js"), root.join("c.js")]);

        fs::remove_file(root.join("a.js")).expect("remove");
        assert!(watcher.poll_once().is_empty());

        touch_later(&root.join("c.js"));
        let _ = watcher.poll_once();
        create_test_file(&root.join("d.js"), "4");
        assert_eq!(watcher.next_change_event(), Some(root.join("d.js")));
    }

    #[test]
    fn test_failure_does_not_stop_later_events() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        let config = watch_config(root);
        create_test_file(&root.join("js/good.js"), "const f = x => x;\n");
        create_test_file(&root.join("js/bad.js"), "var s = 'oops;\n");
        create_test_file(&root.join("js/later.js"), "let y = `v${1}`;\n");

        let mut watch = WatchLoop::new(&config).expect("watch loop");
        let mut events = Scripted(VecDeque::from([
            root.join("js/good.js"),
            root.join("js/bad.js"),
            PathBuf::from("later.js"),
            root.join("js/notes.txt"),
            root.join("js/removed.js"),
        ]));
        watch.run(&mut events);

        assert_eq!(watch.state(), &WatchState::Idle);
        let report = watch.into_report();
        assert_eq!(
            report.compiled,
            vec![root.join("js/min/good.js"), root.join("js/min/later.js")]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, root.join("js/bad.js"));
        assert!(report.failures[0].message.contains("bad.js"));
        assert!(!root.join("js/min/bad.js").exists());

        assert_eq!(
            fs::read_to_string(root.join("js/min/good.js")).expect("read"),
            "var f = function (x) { return x; };\n"
        );
        assert_eq!(
            fs::read_to_string(root.join("js/min/later.js")).expect("read"),
            "var y = (\"v\" + (1));\n"
        );
    }

    #[test]
    fn test_compile_all_skips_output_directory() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        let config = WatchConfig {
            pattern: "**/*.js".to_owned(),
            ..watch_config(root)
        };
        create_test_file(&root.join("js/a.js"), "let a = 1;\n");
        create_test_file(&root.join("js/nested/b.js"), "let b = 2;\n");
        create_test_file(&root.join("js/min/stale.js"), "let c = 3;\n");

        let mut watch = WatchLoop::new(&config).expect("watch loop");
        watch.compile_all();

        assert_eq!(
            watch.report().compiled,
            vec![root.join("js/min/a.js"), root.join("js/min/nested/b.js")]
        );
        assert!(!root.join("js/min/min/stale.js").exists());
    }

    #[test]
    fn test_missing_watch_dir_is_config_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let err = WatchLoop::new(&watch_config(temp_dir.path())).expect_err("missing dir");
        assert!(err.is_config());
    }
}
