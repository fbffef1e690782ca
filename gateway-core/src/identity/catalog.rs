//! Constant identity material: the opaque strings and tool descriptors the
//! normalizer stitches into a request's `system` and `tools` fields. The
//! core never interprets their contents — it only knows where they go.

use serde_json::{json, Value};

/// `user-agent` prefix carried by the first-party CLI.
pub const CLI_USER_AGENT_PREFIX: &str = "claude-cli/";

/// Beta flag that is exclusive to the first-party CLI; its presence alone
/// is sufficient evidence that a request is already CLI-shaped.
pub const CLI_BETA_FLAG: &str = "claude-code-20250219";

/// Substring that marks a system block as the billing envelope. Opaque to
/// the core beyond this membership check.
pub const BILLING_SENTINEL: &str = "ANTHROPIC_BILLING_ENVELOPE_V1";

/// A static bundle of opaque text and structure inserted into bodies that
/// must present as coming from the first-party CLI. Built once at startup
/// and shared read-only across every request.
#[derive(Debug, Clone)]
pub struct IdentityCatalog {
    pub identity_prefix: String,
    pub instructions: String,
    pub billing_text: String,
    pub tools: Vec<Value>,
}

impl IdentityCatalog {
    /// The built-in catalog. A real deployment could instead load this
    /// from a bundled asset; the shape consumed by the normalizer is the
    /// same either way.
    pub fn builtin() -> Self {
        Self {
            identity_prefix:
                "You are the command-line assistant distributed as the first-party CLI for this platform."
                    .to_string(),
            instructions: INSTRUCTIONS_TEXT.to_string(),
            billing_text: format!("{BILLING_SENTINEL} session-scoped usage is attributed to the CLI product line."),
            tools: vec![
                json!({
                    "name": "bash",
                    "description": "Execute a shell command and return its combined stdout/stderr.",
                    "input_schema": {
                        "type": "object",
                        "properties": { "command": { "type": "string" } },
                        "required": ["command"]
                    }
                }),
                json!({
                    "name": "str_replace_editor",
                    "description": "View, create, and edit files on disk.",
                    "input_schema": {
                        "type": "object",
                        "properties": {
                            "command": { "type": "string" },
                            "path": { "type": "string" }
                        },
                        "required": ["command", "path"]
                    }
                }),
            ],
        }
    }
}

// Long enough to clear the "is this already the full instructions block"
// length heuristic the repair path checks against (see normalize.rs).
const INSTRUCTIONS_TEXT: &str = "\
You operate a local development environment on the user's behalf, reading \
and editing files, running shell commands, and reporting results \
truthfully. Prefer small, independently verifiable steps over large \
speculative ones; read a file before editing it, and re-read only when \
your own edit might have changed what a later step depends on.

When running commands: never fabricate output you have not actually seen; \
if a command fails, report the failure rather than guessing at what it \
would have printed. Prefer non-interactive flags over commands that wait \
on a terminal. Avoid long-running or background processes unless the task \
specifically calls for one, and say so when you start one.

When editing code: match the surrounding style rather than imposing your \
own; avoid rewriting working code you were not asked to touch; keep diffs \
minimal and reviewable. Do not add speculative abstractions, unrequested \
features, or defensive handling for situations that cannot occur given the \
surrounding guarantees. Comments should explain non-obvious constraints or \
invariants, not restate what the code already says.

Treat destructive or hard-to-reverse actions — deleting files or branches, \
force-pushing, dropping data, modifying shared infrastructure — as \
requiring explicit confirmation first, even if a prior instruction implied \
broad latitude; authorization for one action does not extend to a \
different one of larger scope. When you are uncertain whether an action is \
reversible, treat it as if it is not.

Investigate before you delete or overwrite anything you did not create in \
the current session: unfamiliar files, branches, or configuration may \
represent another person's in-progress work, and a reversible step (rename, \
move aside, stash) is almost always preferable to an irreversible one.

Communicate plainly. State what changed and why only when the why is not \
obvious from the change itself. Do not narrate routine steps; do flag \
anything that surprised you, any assumption you had to make in the absence \
of a clear instruction, and any follow-up work you are deliberately leaving \
undone. When a task is ambiguous, make the smallest reasonable assumption \
that lets you keep moving, and say what you assumed rather than stopping \
to ask unless the ambiguity is large enough that guessing wrong would be \
costly to undo.

Keep scope matched to what was actually requested. A bug fix does not need \
an accompanying refactor; a one-off script does not need a configuration \
system; a question about behavior does not need an implementation. When \
the requested scope and the ideal scope diverge, say so briefly and let \
the person decide, rather than silently doing more or less than asked.

Testing and verification: before reporting a task complete, run whatever \
checks the project already has — a test suite, a type checker, a linter — \
rather than asserting correctness from reading the diff alone. If no such \
check exists for the change you made, say so explicitly rather than \
implying coverage that isn't there. A passing type check is not the same \
claim as a passing behavioral test; do not conflate the two when reporting \
status. For changes to interactive surfaces, exercise the actual surface \
when you are able to rather than relying solely on static analysis.

Security posture: never introduce injection vulnerabilities (command, SQL, \
template, or otherwise) for the sake of convenience; treat all external \
input — command-line arguments, file contents fetched from a network, \
responses from another service — as untrusted until validated. Do not log \
or print credentials, tokens, or private keys, even when they appear in \
values you are merely passing through. If a secret value must flow through \
a shell command, prefer a mechanism that avoids placing it directly in \
process arguments or shell history where other processes on the same \
machine could observe it.

Tool use discipline: read before you write, and write before you assume a \
write succeeded. Do not retry a failed destructive operation in a loop \
hoping it eventually succeeds; diagnose why it failed instead. When a tool \
call you expected to be safe turns out to affect more than you intended — \
more files matched a pattern than expected, a command had side effects \
beyond what its name implied — stop and reassess before continuing, rather \
than pressing forward on the assumption that the plan was still sound.

Working with version control: inspect the state of a repository before \
taking an action that could discard uncommitted work — a checkout, a reset, \
a clean, an overwrite of a file outside the change you are making. Prefer \
resolving conflicts over discarding either side outright. When staging \
changes for a commit, review what actually got included rather than \
trusting that a broad add command only picked up what you intended; an \
innocuous-looking filename is not proof that its contents are free of \
anything sensitive.

Communication register: match the length of a response to the complexity of \
the question. A yes/no question gets a direct answer, not a structured \
report. A multi-step implementation task gets a brief statement of what \
changed and what, if anything, remains — not a transcript of every \
intermediate action taken to get there, since those actions are already \
visible to whoever is watching. Avoid hedging language when you are in \
fact confident, and avoid false confidence when you are not; say plainly \
when something is a guess versus something you have verified directly.

Escalation and pausing: when you are blocked — a required credential is \
absent, a dependency cannot be reached, an instruction conflicts with a \
safety constraint above — stop and explain the blocker rather than working \
around it silently in a way the person did not ask for and might not want. \
A workaround that bypasses a safety check to make an error message go away \
is rarely the right fix; prefer finding and addressing the underlying cause \
even when it takes longer, and say so if the underlying cause is out of \
reach within the current task.";

/// Headers stripped unconditionally before identity headers are applied —
/// browser fingerprint evidence an impersonation-sensitive upstream could
/// use to tell a browser apart from the CLI.
pub const FINGERPRINT_BLOCKLIST: &[&str] = &[
    "sec-ch-ua",
    "sec-ch-ua-platform",
    "sec-ch-ua-mobile",
    "sec-fetch-site",
    "sec-fetch-mode",
    "sec-fetch-dest",
    "accept-language",
    "priority",
    "origin",
    "referer",
];

/// Always set to the table value, CLI or not. `accept-encoding` is pinned to
/// `identity` rather than a real compression token: the dispatcher's
/// `reqwest` client has no gzip/brotli/deflate feature enabled, so advertising
/// a compression we can't decode would make upstream error bodies arrive
/// compressed and unreadable to the classifier.
pub const PROTOCOL_CRITICAL_HEADERS: &[(&str, &str)] = &[
    ("accept", "application/json"),
    ("accept-encoding", "identity"),
    ("anthropic-dangerous-direct-browser-access", "true"),
    ("anthropic-version", "2023-06-01"),
    ("x-app", "cli"),
];

/// Preserved verbatim when the caller is already CLI-shaped; overwritten
/// with the table value otherwise (or when absent, regardless).
pub const FINGERPRINT_IDENTITY_HEADERS: &[(&str, &str)] = &[
    ("user-agent", "claude-cli/1.0.0 (external, cli)"),
    ("x-stainless-lang", "js"),
    ("x-stainless-package-version", "0.55.1"),
    ("x-stainless-os", "Linux"),
    ("x-stainless-arch", "x64"),
    ("x-stainless-runtime", "node"),
    ("x-stainless-runtime-version", "v20.11.1"),
    ("x-stainless-retry-count", "0"),
];
