//! Status detection against fake home directories
//!
//! Every test builds the on-disk layout of one agent under a `TempDir` home
//! and backdates mtimes with `filetime` so freshness is deterministic.

use filetime::FileTime;
use sessionwatch::agents::{self, StatusDetector};
use sessionwatch::cache::LocatorCaches;
use sessionwatch::config::Thresholds;
use sessionwatch::data::{AgentFormat, Detection, WorktreeStatus};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

struct Fixture {
    home: TempDir,
    worktree: PathBuf,
    now: SystemTime,
}

impl Fixture {
    fn new() -> Self {
        let home = TempDir::new().unwrap();
        let worktree = home.path().join("work").join("project");
        fs::create_dir_all(&worktree).unwrap();
        Self {
            home,
            worktree,
            now: SystemTime::now(),
        }
    }

    fn home(&self) -> &Path {
        self.home.path()
    }

    /// Write `content` to `path` and backdate it by `age`
    fn write(&self, path: &Path, content: &str, age: Duration) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        let mtime = FileTime::from_system_time(self.now - age);
        filetime::set_file_mtime(path, mtime).unwrap();
    }

    fn detector(&self) -> StatusDetector {
        StatusDetector::new(
            self.home(),
            Thresholds::default(),
            Arc::new(LocatorCaches::default()),
        )
    }

    fn detect(&self, format: AgentFormat) -> Detection {
        self.detector()
            .detect_status_at(format, &self.worktree, self.now)
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

mod claude {
    use super::*;
    use pretty_assertions::assert_eq;

    const USER: &str = r#"{"type":"user","message":{"role":"user","content":"fix the build"}}"#;
    const TOOL_USE: &str = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Running tests"},{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"make"}}]}}"#;
    const TEXT: &str = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"All green."}]}}"#;
    const PLACEHOLDER: &str = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"\n\n"}]}}"#;
    const SNAPSHOT: &str = r#"{"type":"file-history-snapshot","snapshot":{}}"#;

    fn session(fx: &Fixture, name: &str) -> PathBuf {
        agents::claude::project_dir(fx.home(), &fx.worktree).join(name)
    }

    fn lines(entries: &[&str]) -> String {
        entries.join("\n") + "\n"
    }

    #[test]
    fn no_project_dir_is_not_found() {
        let fx = Fixture::new();
        assert_eq!(fx.detect(AgentFormat::Claude), Detection::not_found());
    }

    #[test]
    fn fresh_mtime_is_active_even_when_unparseable() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "a.jsonl"), "not json at all\n{{{", secs(1));

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn trailing_user_message_is_thinking_once_quiet() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "a.jsonl"), &lines(&[TEXT, USER]), secs(10));

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Thinking)
        );
    }

    #[test]
    fn trailing_user_message_is_active_while_fresh() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "a.jsonl"), &lines(&[TEXT, USER]), secs(2));

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn stale_tool_use_is_waiting() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "a.jsonl"), &lines(&[USER, TOOL_USE]), secs(60));

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Waiting)
        );
    }

    #[test]
    fn stale_text_only_reply_is_done() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "a.jsonl"), &lines(&[USER, TEXT]), secs(60));

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Done)
        );
    }

    #[test]
    fn worktree_with_parent_components_resolves_to_same_project() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "a.jsonl"), &lines(&[USER, TEXT]), secs(60));

        let roundabout = fx.worktree.join("..").join("project").join(".");
        assert_eq!(
            fx.detector()
                .detect_status_at(AgentFormat::Claude, &roundabout, fx.now),
            Detection::found(WorktreeStatus::Done)
        );
    }

    #[test]
    fn whitespace_placeholder_is_thinking() {
        let fx = Fixture::new();
        fx.write(
            &session(&fx, "a.jsonl"),
            &lines(&[USER, PLACEHOLDER]),
            secs(60),
        );

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Thinking)
        );
    }

    #[test]
    fn newest_without_roles_falls_back_to_next_candidate() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "newest.jsonl"), &lines(&[SNAPSHOT]), secs(30));
        fx.write(&session(&fx, "older.jsonl"), &lines(&[USER, TEXT]), secs(90));

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Done)
        );
    }

    #[test]
    fn top_level_agent_files_are_not_sessions() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "agent-1.jsonl"), &lines(&[USER]), secs(1));

        assert_eq!(fx.detect(AgentFormat::Claude), Detection::not_found());
    }

    #[test]
    fn live_subagent_overrides_stale_parent() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "abc.jsonl"), &lines(&[USER, TEXT]), secs(60));
        fx.write(
            &session(&fx, "abc").join("subagents").join("agent-1.jsonl"),
            &lines(&[TOOL_USE, USER]),
            secs(10),
        );

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn fresh_subagent_mtime_is_active() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "abc.jsonl"), &lines(&[USER, TOOL_USE]), secs(60));
        fx.write(
            &session(&fx, "abc").join("subagents").join("agent-1.jsonl"),
            &lines(&[TEXT]),
            secs(1),
        );

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn abandoned_subagent_is_ignored() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "abc.jsonl"), &lines(&[USER, TOOL_USE]), secs(600));
        fx.write(
            &session(&fx, "abc").join("subagents").join("agent-1.jsonl"),
            &lines(&[USER]),
            secs(300),
        );

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Waiting)
        );
    }

    #[test]
    fn finished_subagent_keeps_parent_status() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "abc.jsonl"), &lines(&[USER, TEXT]), secs(60));
        fx.write(
            &session(&fx, "abc").join("subagents").join("agent-1.jsonl"),
            &lines(&[USER, TEXT]),
            secs(30),
        );

        assert_eq!(
            fx.detect(AgentFormat::Claude),
            Detection::found(WorktreeStatus::Done)
        );
    }
}

mod codex {
    use super::*;
    use pretty_assertions::assert_eq;

    fn meta(cwd: &Path) -> String {
        format!(
            r#"{{"type":"session_meta","payload":{{"id":"s1","cwd":"{}"}}}}"#,
            cwd.display()
        )
    }

    fn message(role: &str) -> String {
        format!(
            r#"{{"type":"response_item","payload":{{"type":"message","role":"{}","content":[]}}}}"#,
            role
        )
    }

    fn rollout(fx: &Fixture, name: &str) -> PathBuf {
        agents::codex::sessions_dir(fx.home())
            .join("2025")
            .join("01")
            .join("15")
            .join(name)
    }

    #[test]
    fn assistant_last_is_waiting() {
        let fx = Fixture::new();
        let content = [meta(&fx.worktree), message("user"), message("assistant")].join("\n");
        fx.write(&rollout(&fx, "rollout-a.jsonl"), &content, secs(120));

        assert_eq!(
            fx.detect(AgentFormat::Codex),
            Detection::found(WorktreeStatus::Waiting)
        );
    }

    #[test]
    fn user_last_is_active() {
        let fx = Fixture::new();
        let content = [meta(&fx.worktree), message("assistant"), message("user")].join("\n");
        fx.write(&rollout(&fx, "rollout-a.jsonl"), &content, secs(120));

        assert_eq!(
            fx.detect(AgentFormat::Codex),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn session_started_in_subdirectory_matches() {
        let fx = Fixture::new();
        let content = [meta(&fx.worktree.join("crates/core")), message("assistant")].join("\n");
        fx.write(&rollout(&fx, "rollout-a.jsonl"), &content, secs(120));

        assert_eq!(
            fx.detect(AgentFormat::Codex),
            Detection::found(WorktreeStatus::Waiting)
        );
    }

    #[test]
    fn session_meta_after_a_long_preamble_still_matches() {
        let fx = Fixture::new();
        let mut records: Vec<String> = (0..40)
            .map(|i| format!(r#"{{"type":"event_msg","payload":{{"seq":{}}}}}"#, i))
            .collect();
        records.push(meta(&fx.worktree));
        records.push(message("assistant"));
        fx.write(&rollout(&fx, "rollout-a.jsonl"), &records.join("\n"), secs(120));

        assert_eq!(
            fx.detect(AgentFormat::Codex),
            Detection::found(WorktreeStatus::Waiting)
        );
    }

    #[test]
    fn sibling_with_shared_prefix_does_not_match() {
        let fx = Fixture::new();
        let sibling = PathBuf::from(format!("{}-other", fx.worktree.display()));
        let content = [meta(&sibling), message("assistant")].join("\n");
        fx.write(&rollout(&fx, "rollout-a.jsonl"), &content, secs(120));

        assert_eq!(fx.detect(AgentFormat::Codex), Detection::not_found());
    }

    #[test]
    fn newest_matching_rollout_wins_and_fresh_is_active() {
        let fx = Fixture::new();
        let old = [meta(&fx.worktree), message("assistant")].join("\n");
        let new = [meta(&fx.worktree), message("assistant")].join("\n");
        fx.write(&rollout(&fx, "rollout-old.jsonl"), &old, secs(600));
        fx.write(&rollout(&fx, "rollout-new.jsonl"), &new, secs(3));

        assert_eq!(
            fx.detect(AgentFormat::Codex),
            Detection::found(WorktreeStatus::Active)
        );
    }
}

mod gemini {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chat(fx: &Fixture, name: &str) -> PathBuf {
        agents::gemini::chats_dir(fx.home(), &fx.worktree).join(name)
    }

    #[test]
    fn gemini_last_is_waiting() {
        let fx = Fixture::new();
        fx.write(
            &chat(&fx, "session-1.json"),
            r#"{"sessionId":"1","messages":[{"type":"user","content":"hi"},{"type":"gemini","content":"hello"},{"type":"info","content":"saved"}]}"#,
            secs(120),
        );

        assert_eq!(
            fx.detect(AgentFormat::Gemini),
            Detection::found(WorktreeStatus::Waiting)
        );
    }

    #[test]
    fn user_last_is_active() {
        let fx = Fixture::new();
        fx.write(
            &chat(&fx, "session-1.json"),
            r#"{"messages":[{"type":"gemini","content":"hello"},{"type":"user","content":"go on"}]}"#,
            secs(120),
        );

        assert_eq!(
            fx.detect(AgentFormat::Gemini),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn fresh_file_is_active() {
        let fx = Fixture::new();
        fx.write(&chat(&fx, "session-1.json"), "{ truncated", secs(5));

        assert_eq!(
            fx.detect(AgentFormat::Gemini),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn broken_newest_falls_back_to_older_chat() {
        let fx = Fixture::new();
        fx.write(&chat(&fx, "session-2.json"), "{ truncated", secs(60));
        fx.write(
            &chat(&fx, "session-1.json"),
            r#"{"messages":[{"type":"user"},{"type":"gemini"}]}"#,
            secs(120),
        );

        assert_eq!(
            fx.detect(AgentFormat::Gemini),
            Detection::found(WorktreeStatus::Waiting)
        );
    }
}

mod opencode {
    use super::*;
    use pretty_assertions::assert_eq;

    fn storage(fx: &Fixture) -> PathBuf {
        fx.home().join(".local/share/opencode/storage")
    }

    fn seed(fx: &Fixture, role: &str, age: Duration) {
        let storage = storage(fx);
        fx.write(
            &storage.join("project/p1.json"),
            &format!(r#"{{"id":"p1","worktree":"{}"}}"#, fx.worktree.display()),
            secs(600),
        );
        fx.write(
            &storage.join("session/p1/ses_1.json"),
            r#"{"id":"ses_1","projectID":"p1"}"#,
            secs(600),
        );
        fx.write(
            &storage.join("message/ses_1/msg_1.json"),
            &format!(r#"{{"id":"msg_1","role":"{}"}}"#, role),
            age,
        );
    }

    #[test]
    fn assistant_last_is_waiting() {
        let fx = Fixture::new();
        seed(&fx, "assistant", secs(120));

        assert_eq!(
            fx.detect(AgentFormat::OpenCode),
            Detection::found(WorktreeStatus::Waiting)
        );
    }

    #[test]
    fn user_last_is_active() {
        let fx = Fixture::new();
        seed(&fx, "user", secs(120));

        assert_eq!(
            fx.detect(AgentFormat::OpenCode),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn fresh_message_is_active() {
        let fx = Fixture::new();
        seed(&fx, "assistant", secs(2));

        assert_eq!(
            fx.detect(AgentFormat::OpenCode),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn unknown_project_is_not_found() {
        let fx = Fixture::new();
        fx.write(
            &storage(&fx).join("project/p1.json"),
            r#"{"id":"p1","worktree":"/somewhere/else"}"#,
            secs(600),
        );

        assert_eq!(fx.detect(AgentFormat::OpenCode), Detection::not_found());
    }
}

mod pi {
    use super::*;
    use pretty_assertions::assert_eq;

    fn session(fx: &Fixture, name: &str) -> PathBuf {
        agents::pi::project_dir(fx.home(), &fx.worktree).join(name)
    }

    const USER: &str = r#"{"type":"message","message":{"role":"user","content":"hi"}}"#;
    const ASSISTANT: &str = r#"{"type":"message","message":{"role":"assistant","content":"hello"}}"#;
    const MODEL_CHANGE: &str = r#"{"type":"model_change","provider":"x"}"#;

    #[test]
    fn assistant_last_is_waiting() {
        let fx = Fixture::new();
        fx.write(
            &session(&fx, "s.jsonl"),
            &[USER, ASSISTANT, MODEL_CHANGE].join("\n"),
            secs(120),
        );

        assert_eq!(
            fx.detect(AgentFormat::Pi),
            Detection::found(WorktreeStatus::Waiting)
        );
    }

    #[test]
    fn user_last_is_active() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "s.jsonl"), &[ASSISTANT, USER].join("\n"), secs(120));

        assert_eq!(
            fx.detect(AgentFormat::Pi),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn file_without_messages_is_not_found() {
        let fx = Fixture::new();
        fx.write(&session(&fx, "s.jsonl"), MODEL_CHANGE, secs(120));

        assert_eq!(fx.detect(AgentFormat::Pi), Detection::not_found());
    }
}

mod amp {
    use super::*;
    use pretty_assertions::assert_eq;

    fn thread(fx: &Fixture, name: &str, tree: &Path, messages: &str, age: Duration) {
        let uri = format!("file://{}", tree.display());
        fx.write(
            &agents::amp::threads_dir(fx.home()).join(name),
            &format!(
                r#"{{"id":"T-1","env":{{"initial":{{"trees":[{{"displayName":"p","uri":"{}"}}]}}}},"messages":{}}}"#,
                uri, messages
            ),
            age,
        );
    }

    #[test]
    fn matching_thread_assistant_last_is_waiting() {
        let fx = Fixture::new();
        thread(
            &fx,
            "T-1.json",
            &fx.worktree,
            r#"[{"role":"user"},{"role":"assistant"}]"#,
            secs(120),
        );

        assert_eq!(
            fx.detect(AgentFormat::Amp),
            Detection::found(WorktreeStatus::Waiting)
        );
    }

    #[test]
    fn matching_thread_without_messages_is_unknown_but_found() {
        let fx = Fixture::new();
        thread(&fx, "T-1.json", &fx.worktree, "[]", secs(120));

        assert_eq!(
            fx.detect(AgentFormat::Amp),
            Detection::found(WorktreeStatus::Unknown)
        );
    }

    #[test]
    fn newer_thread_for_other_tree_is_skipped() {
        let fx = Fixture::new();
        thread(
            &fx,
            "T-2.json",
            Path::new("/elsewhere"),
            r#"[{"role":"assistant"}]"#,
            secs(10),
        );
        thread(
            &fx,
            "T-1.json",
            &fx.worktree,
            r#"[{"role":"assistant"},{"role":"user"}]"#,
            secs(120),
        );

        assert_eq!(
            fx.detect(AgentFormat::Amp),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn fresh_matching_thread_is_active() {
        let fx = Fixture::new();
        thread(
            &fx,
            "T-1.json",
            &fx.worktree,
            r#"[{"role":"assistant"}]"#,
            secs(3),
        );

        assert_eq!(
            fx.detect(AgentFormat::Amp),
            Detection::found(WorktreeStatus::Active)
        );
    }
}

mod cursor {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store(fx: &Fixture, session: &str, file: &str) -> PathBuf {
        agents::cursor::workspace_dir(fx.home(), &fx.worktree)
            .join(session)
            .join(file)
    }

    #[test]
    fn recent_store_write_is_active() {
        let fx = Fixture::new();
        fx.write(&store(&fx, "s1", "store.db"), "", secs(600));
        fx.write(&store(&fx, "s2", "store.db-wal"), "", secs(4));

        assert_eq!(
            fx.detect(AgentFormat::Cursor),
            Detection::found(WorktreeStatus::Active)
        );
    }

    #[test]
    fn quiet_store_is_not_found() {
        let fx = Fixture::new();
        fx.write(&store(&fx, "s1", "store.db"), "", secs(600));

        assert_eq!(fx.detect(AgentFormat::Cursor), Detection::not_found());
    }
}

mod codex_caching {
    use super::*;
    use pretty_assertions::assert_eq;
    use sessionwatch::cache::FileStamp;

    #[test]
    fn header_cwd_is_cached_per_file_stamp() {
        let fx = Fixture::new();
        let path = agents::codex::sessions_dir(fx.home()).join("2025/01/15/rollout-a.jsonl");
        fx.write(
            &path,
            &format!(
                r#"{{"type":"session_meta","payload":{{"cwd":"{}"}}}}"#,
                fx.worktree.display()
            ),
            secs(120),
        );

        let detector = fx.detector();
        detector.detect_status_at(AgentFormat::Codex, &fx.worktree, fx.now);

        let stamp = FileStamp::of(&fs::metadata(&path).unwrap());
        assert_eq!(
            detector.caches().session_cwds.get(&path, stamp),
            Some(fx.worktree.display().to_string())
        );
        assert_eq!(detector.caches().session_paths.len(), 1);
    }
}
