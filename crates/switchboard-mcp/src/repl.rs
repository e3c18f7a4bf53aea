//! Interactive REPL for the Switchboard MCP server.
//!
//! Launch with `switchboard-mcp repl` to drive a local session by hand.
//! Type `/help` for available commands, Tab for completion.

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::runtime::Handle;

use crate::config::ServerConfig;
use crate::protocol::ProtocolHandler;
use crate::session::SessionManager;
use crate::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId};

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/info", "Show server capabilities and profile"),
    ("/tools", "List available MCP tools"),
    ("/prompts", "List available MCP prompts"),
    ("/load", "Open a .swbd store file"),
    ("/sessions", "List recorded sessions"),
    ("/tasks", "List tasks of the current store"),
    ("/call", "Call a tool: /call <tool> <json arguments>"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// REPL helper for tab completion.
struct ReplHelper {
    tools: Vec<String>,
}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        let parts: Vec<&str> = input.splitn(2, ' ').collect();
        let cmd = parts[0];
        let args = if parts.len() > 1 { parts[1] } else { "" };

        if cmd == "/load" {
            let mut files = Vec::new();
            if let Ok(entries) = std::fs::read_dir(".") {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().is_some_and(|e| e == "swbd") {
                        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                            files.push(name.to_string());
                        }
                    }
                }
            }
            files.sort();
            let prefix_start = input.len() - args.len();
            let matches: Vec<Pair> = files
                .iter()
                .filter(|f| f.starts_with(args.trim()))
                .map(|f| Pair {
                    display: f.clone(),
                    replacement: format!("{f} "),
                })
                .collect();
            return Ok((prefix_start, matches));
        }

        if cmd == "/call" && !args.contains(' ') {
            let matches: Vec<Pair> = self
                .tools
                .iter()
                .filter(|t| t.starts_with(args))
                .map(|t| Pair {
                    display: t.clone(),
                    replacement: format!("{t} "),
                })
                .collect();
            return Ok((input.len() - args.len(), matches));
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for ReplHelper {}
impl Validator for ReplHelper {}
impl Helper for ReplHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}


/// The store and local session the REPL drives.
struct ReplState {
    runtime: Handle,
    config: ServerConfig,
    store_path: PathBuf,
    handler: ProtocolHandler,
    next_id: i64,
}

impl ReplState {
    fn open(runtime: Handle, config: ServerConfig, store_path: PathBuf) -> anyhow::Result<Self> {
        let handler = runtime.block_on(connect(config.clone(), store_path.clone()))?;
        Ok(Self {
            runtime,
            config,
            store_path,
            handler,
            next_id: 2,
        })
    }

    fn core(&self) -> &Arc<SessionManager> {
        self.handler.core()
    }

    fn request(&mut self, method: &str, params: Option<Value>) -> Option<Value> {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;
        let message = JsonRpcMessage::Request(JsonRpcRequest::new(id, method, params));
        self.runtime.block_on(self.handler.handle_message(message))
    }

    fn close(&self) {
        if let Err(e) = self.runtime.block_on(self.handler.disconnect()) {
            eprintln!("  Failed to close session: {e}");
        }
    }
}

/// Open the store and run the initialize handshake on a fresh session.
async fn connect(config: ServerConfig, store_path: PathBuf) -> anyhow::Result<ProtocolHandler> {
    let core = Arc::new(SessionManager::open(config, store_path).await?);
    let handler = ProtocolHandler::connect(core, Some("repl".to_string())).await;

    let init = JsonRpcRequest::new(
        RequestId::Number(1),
        "initialize",
        Some(json!({
            "protocolVersion": crate::types::MCP_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "switchboard-repl", "version": env!("CARGO_PKG_VERSION") },
        })),
    );
    handler.handle_message(JsonRpcMessage::Request(init)).await;
    handler
        .handle_message(JsonRpcMessage::Notification(JsonRpcNotification::new(
            crate::types::methods::INITIALIZED.to_string(),
            None,
        )))
        .await;
    Ok(handler)
}

/// Run the interactive REPL. Blocks the calling thread; `runtime` drives the
/// server futures.
pub fn run(runtime: Handle, config: ServerConfig, store_path: PathBuf) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mswitchboard-mcp v{}\x1b[0m \x1b[90m\u{00b7} MCP sessions, tools and tasks\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Press \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let mut state = ReplState::open(runtime, config, store_path)?;

    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<ReplHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(rl_config)?;
    rl.set_helper(Some(ReplHelper {
        tools: state.core().tools().names(),
    }));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = PathBuf::from(&home).join(".switchboard_mcp_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let prompt = " \x1b[36mswitchboard>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let input = line.strip_prefix('/').unwrap_or(line);
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let mut parts = input.splitn(2, ' ');
                let cmd = parts.next().unwrap_or("");
                let args = parts.next().unwrap_or("").trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "info" => cmd_info(&state),
                    "tools" => cmd_tools(&mut state),
                    "prompts" => cmd_prompts(&mut state),
                    "load" => cmd_load(args, &mut state),
                    "sessions" => cmd_sessions(&state),
                    "tasks" => cmd_tasks(&state),
                    "call" => cmd_call(args, &mut state),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    state.close();
    let _ = std::fs::create_dir_all(hist_path.parent().unwrap_or(std::path::Path::new(".")));
    let _ = rl.save_history(&hist_path);

    Ok(())
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Tip: Tab completion works for commands, tool names and .swbd files.");
    eprintln!();
}

fn print_reply(reply: Option<Value>) -> Option<Value> {
    match reply {
        Some(reply) if reply.get("error").is_some() => {
            eprintln!(
                "  Error {}: {}",
                reply["error"]["code"],
                reply["error"]["message"].as_str().unwrap_or("")
            );
            if let Some(data) = reply["error"].get("data") {
                eprintln!("  {data}");
            }
            None
        }
        Some(reply) => reply.get("result").cloned(),
        None => {
            eprintln!("  (no reply)");
            None
        }
    }
}

fn cmd_info(state: &ReplState) {
    let core = state.core();
    let session = state.runtime.block_on(state.handler.session());
    eprintln!();
    eprintln!("  Server:   {}", core.config().server_name);
    eprintln!("  Store:    {}", state.store_path.display());
    eprintln!("  Profile:  {}", state.handler.profile().name);
    if let Ok(session) = session {
        eprintln!("  Session:  {} ({})", session.id, session.status);
        eprintln!(
            "  Protocol: {}",
            session.protocol_version.as_deref().unwrap_or("-")
        );
    }
    eprintln!(
        "  Units:    {} tools, {} prompts",
        core.tools().len(),
        core.prompts().len()
    );
    eprintln!(
        "  Timeout:  {} ms ({:?})",
        state.config.call_timeout_ms, state.config.timeout_policy
    );
    eprintln!();
}

fn cmd_tools(state: &mut ReplState) {
    let Some(result) = print_reply(state.request("tools/list", None)) else {
        return;
    };
    let tools = result["tools"].as_array().cloned().unwrap_or_default();
    eprintln!();
    eprintln!("  {} MCP tools available:", tools.len());
    eprintln!();
    for tool in &tools {
        eprintln!(
            "    {:<28} {}",
            tool["name"].as_str().unwrap_or(""),
            tool["description"].as_str().unwrap_or("")
        );
    }
    eprintln!();
}

fn cmd_prompts(state: &mut ReplState) {
    let Some(result) = print_reply(state.request("prompts/list", None)) else {
        return;
    };
    let prompts = result["prompts"].as_array().cloned().unwrap_or_default();
    eprintln!();
    eprintln!("  {} MCP prompts available:", prompts.len());
    eprintln!();
    for prompt in &prompts {
        eprintln!(
            "    {:<28} {}",
            prompt["name"].as_str().unwrap_or(""),
            prompt["description"].as_str().unwrap_or("")
        );
    }
    eprintln!();
}

fn cmd_load(args: &str, state: &mut ReplState) {
    if args.is_empty() {
        eprintln!("  Usage: /load <file.swbd>");
        return;
    }
    let path = PathBuf::from(args.split_whitespace().next().unwrap_or(args));
    match state
        .runtime
        .block_on(connect(state.config.clone(), path.clone()))
    {
        Ok(handler) => {
            state.close();
            let sessions = state
                .runtime
                .block_on(handler.core().ledger().sessions.count());
            eprintln!("  Loaded: {} ({sessions} sessions)", path.display());
            state.handler = handler;
            state.store_path = path;
            state.next_id = 2;
        }
        Err(e) => {
            eprintln!("  Failed to load: {e}");
        }
    }
}

fn cmd_sessions(state: &ReplState) {
    let sessions = state.runtime.block_on(state.core().ledger().sessions.list());
    eprintln!();
    eprintln!("  {} sessions in {}:", sessions.len(), state.store_path.display());
    eprintln!();
    for session in &sessions {
        let marker = if session.id == state.handler.session_id() {
            "*"
        } else {
            " "
        };
        eprintln!(
            "  {marker} {}  {:<15} {:>4} msgs  {}",
            session.id,
            session.status.as_str(),
            session.messages_count,
            session.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    eprintln!();
}

fn cmd_tasks(state: &ReplState) {
    let tasks = state
        .runtime
        .block_on(state.core().ledger().tasks.list(None, None));
    eprintln!();
    eprintln!("  {} tasks:", tasks.len());
    eprintln!();
    for task in &tasks {
        eprintln!(
            "    {}  {:<10} {:>3}%  {}",
            task.id,
            task.status.as_str(),
            task.progress_percent.unwrap_or(0),
            task.request_name.as_deref().unwrap_or("-")
        );
    }
    eprintln!();
}

fn cmd_call(args: &str, state: &mut ReplState) {
    let mut parts = args.splitn(2, ' ');
    let name = parts.next().unwrap_or("");
    if name.is_empty() {
        eprintln!("  Usage: /call <tool> <json arguments>");
        return;
    }
    let raw = parts.next().unwrap_or("{}").trim();
    let arguments: Value = match serde_json::from_str(if raw.is_empty() { "{}" } else { raw }) {
        Ok(arguments) => arguments,
        Err(e) => {
            eprintln!("  Arguments are not valid JSON: {e}");
            return;
        }
    };

    let reply = state.request(
        "tools/call",
        Some(json!({ "name": name, "arguments": arguments })),
    );
    let Some(result) = print_reply(reply) else {
        return;
    };

    if let Some(task) = result.get("task") {
        eprintln!(
            "  Running as task {} (poll with /tasks)",
            task["taskId"].as_str().unwrap_or("?")
        );
        return;
    }

    let marker = if result["isError"].as_bool().unwrap_or(false) {
        "\x1b[31m\u{2717}\x1b[0m"
    } else {
        "\x1b[32m\u{2713}\x1b[0m"
    };
    for content in result["content"].as_array().cloned().unwrap_or_default() {
        match content["type"].as_str() {
            Some("text") => eprintln!("  {marker} {}", content["text"].as_str().unwrap_or("")),
            Some(kind) => eprintln!("  {marker} [{kind}] {}", content),
            None => eprintln!("  {marker} {content}"),
        }
    }
}
