//! Operator console
//!
//! One command per line, whitespace separated. Diagnostics (`ME`, `PRED`,
//! `SUCC`, `ALL`, `RECOVER`, `MEMBER`, `HB`, `HASH`) go to stderr; storage
//! commands answer on stdout. `BATCH` replays storage commands from a file
//! and appends their answers to another.

use crate::common::{Error, Result};
use crate::node::Node;
use crate::transport::PeerInfo;
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};

pub const INVALID_COMMAND: &str = "Invalid command";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Me,
    Pred,
    Succ,
    All,
    Recover,
    Member,
    Heartbeats,
    Hash(String),
    Set(String, String),
    Get(String),
    Owners(String),
    ListLocal,
    Batch { input: String, output: String },
    Exit,
}

impl Command {
    /// Commands allowed inside a batch file
    pub fn is_batchable(&self) -> bool {
        matches!(
            self,
            Command::Set(..) | Command::Get(_) | Command::Owners(_) | Command::ListLocal
        )
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let invalid = || Error::InvalidCommand(line.trim().to_string());
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(invalid)?;
        let mut arg = || words.next().map(str::to_string).ok_or_else(invalid);

        let command = match verb {
            "ME" => Command::Me,
            "PRED" => Command::Pred,
            "SUCC" => Command::Succ,
            "ALL" => Command::All,
            "RECOVER" => Command::Recover,
            "MEMBER" => Command::Member,
            "HB" => Command::Heartbeats,
            "HASH" => Command::Hash(arg()?),
            "SET" => {
                let key = arg()?;
                Command::Set(key, arg()?)
            }
            "GET" => Command::Get(arg()?),
            "OWNERS" => Command::Owners(arg()?),
            "LIST_LOCAL" => Command::ListLocal,
            "BATCH" => {
                let input = arg()?;
                Command::Batch {
                    input,
                    output: arg()?,
                }
            }
            "EXIT" => Command::Exit,
            _ => return Err(invalid()),
        };
        Ok(command)
    }
}

/// Lines produced by one command
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Output {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl Output {
    fn stdout(lines: Vec<String>) -> Self {
        Self {
            stdout: lines,
            stderr: Vec::new(),
        }
    }

    fn stderr(lines: Vec<String>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: lines,
        }
    }
}

fn describe(peers: impl IntoIterator<Item = PeerInfo>) -> Vec<String> {
    peers.into_iter().map(|peer| peer.to_string()).collect()
}

/// Run one command against `node`.
pub async fn execute(node: &Node, command: &Command) -> Result<Output> {
    let output = match command {
        Command::Me => Output::stderr(describe([node.info().clone()])),
        Command::Pred => Output::stderr(describe([node.neighbors().0])),
        Command::Succ => Output::stderr(describe([node.neighbors().1])),
        Command::All => Output::stderr(describe(node.all_nodes().await?)),
        Command::Recover => Output::stderr(vec![node.is_recovering().to_string()]),
        Command::Member => Output::stderr(describe(node.membership().into_values())),
        Command::Heartbeats => Output::stderr(describe(node.heartbeat_peers())),
        Command::Hash(key) => Output::stderr(vec![node.hash(key).to_string()]),
        Command::Batch { input, output } => {
            let dir = &node.config().resource_dir;
            let count = run_batch(node, &dir.join(input), &dir.join(output)).await?;
            Output::stderr(vec![format!("BATCH {} lines", count)])
        }
        Command::Exit => {
            node.leave().await?;
            Output::default()
        }
        storage => Output::stdout(execute_storage(node, storage).await?),
    };
    Ok(output)
}

/// Answer a storage command (`SET`, `GET`, `OWNERS`, `LIST_LOCAL`).
async fn execute_storage(node: &Node, command: &Command) -> Result<Vec<String>> {
    let lines = match command {
        Command::Set(key, value) => {
            node.put(key, value).await?;
            vec!["SET OK".to_string()]
        }
        Command::Get(key) => match node.get(key).await? {
            Some(value) => vec![format!("Found: {}", value)],
            None => vec!["Not found".to_string()],
        },
        Command::Owners(key) => {
            let owners = node.find_owners(key).await?;
            let names: Vec<String> = owners.into_iter().map(|peer| peer.name).collect();
            vec![names.join(" ")]
        }
        Command::ListLocal => {
            let mut lines: Vec<String> = node.storage_snapshot().into_keys().collect();
            lines.push("END LIST".to_string());
            lines
        }
        other => return Err(Error::InvalidCommand(format!("{:?}", other))),
    };
    Ok(lines)
}

/// Replay `input` line by line, appending every answer to `output`.
/// Returns the number of command lines processed.
pub async fn run_batch(node: &Node, input: &Path, output: &Path) -> Result<usize> {
    let contents = tokio::fs::read_to_string(input).await?;
    let mut out = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .await?;

    let mut count = 0;
    for line in contents.lines().filter(|line| !line.trim().is_empty()) {
        count += 1;
        let lines = match line.parse::<Command>() {
            Ok(command) if command.is_batchable() => {
                execute_storage(node, &command).await.unwrap_or_else(|e| {
                    tracing::warn!("{}: batch line {:?} failed: {}", node.info(), line, e);
                    vec![format!("Error: {}", e)]
                })
            }
            _ => vec![INVALID_COMMAND.to_string()],
        };
        for line in lines {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
    }
    out.flush().await?;
    Ok(count)
}

/// Read commands from `input` until `EXIT` or end of input.
///
/// Returns true if the loop ended on `EXIT`.
pub async fn run<R>(node: &Node, input: R) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(_) => {
                eprintln!("{}", INVALID_COMMAND);
                continue;
            }
        };

        match execute(node, &command).await {
            Ok(output) => {
                for line in output.stdout {
                    println!("{}", line);
                }
                for line in output.stderr {
                    eprintln!("{}", line);
                }
            }
            Err(e) => {
                tracing::error!("{}: {:?} failed: {}", node.info(), command, e);
                eprintln!("Error: {}", e);
            }
        }

        if command == Command::Exit {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Config;
    use crate::transport::memory::MemoryNetwork;
    use std::sync::Arc;

    fn node(config: Config) -> Node {
        Node::new(
            PeerInfo::new("vm-1", 42, "mem"),
            config,
            Arc::new(MemoryNetwork::new()),
        )
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("ME".parse::<Command>().unwrap(), Command::Me);
        assert_eq!("HB".parse::<Command>().unwrap(), Command::Heartbeats);
        assert_eq!(
            "SET  a   1".parse::<Command>().unwrap(),
            Command::Set("a".into(), "1".into())
        );
        assert_eq!(
            "BATCH in.txt out.txt".parse::<Command>().unwrap(),
            Command::Batch {
                input: "in.txt".into(),
                output: "out.txt".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        for line in ["", "SET a", "GET", "set a 1", "FOO", "BATCH in.txt"] {
            let err = line.parse::<Command>().unwrap_err();
            assert!(matches!(err, Error::InvalidCommand(_)), "{:?}", line);
        }
    }

    #[tokio::test]
    async fn test_storage_commands() {
        let node = node(Config::test_config());

        let out = execute(&node, &Command::Set("b".into(), "2".into()))
            .await
            .unwrap();
        assert_eq!(out.stdout, vec!["SET OK"]);
        execute(&node, &Command::Set("a".into(), "1".into()))
            .await
            .unwrap();

        let out = execute(&node, &Command::Get("a".into())).await.unwrap();
        assert_eq!(out.stdout, vec!["Found: 1"]);
        let out = execute(&node, &Command::Get("zz".into())).await.unwrap();
        assert_eq!(out.stdout, vec!["Not found"]);

        let out = execute(&node, &Command::Owners("a".into())).await.unwrap();
        assert_eq!(out.stdout, vec!["vm-1"]);

        let out = execute(&node, &Command::ListLocal).await.unwrap();
        assert_eq!(out.stdout, vec!["a", "b", "END LIST"]);
    }

    #[tokio::test]
    async fn test_diagnostics_go_to_stderr() {
        let node = node(Config::test_config());
        let out = execute(&node, &Command::Me).await.unwrap();
        assert!(out.stdout.is_empty());
        assert_eq!(out.stderr, vec!["vm-1:42"]);

        let out = execute(&node, &Command::All).await.unwrap();
        assert_eq!(out.stderr, vec!["vm-1:42"]);

        let out = execute(&node, &Command::Recover).await.unwrap();
        assert_eq!(out.stderr, vec!["false"]);
    }

    #[tokio::test]
    async fn test_batch_appends_answers() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            resource_dir: dir.path().to_path_buf(),
            ..Config::test_config()
        };
        let node = node(config);
        std::fs::write(
            dir.path().join("in.txt"),
            "SET a 1\nGET a\nME\nGET b\n\nLIST_LOCAL\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("out.txt"), "previous\n").unwrap();

        let command = "BATCH in.txt out.txt".parse::<Command>().unwrap();
        execute(&node, &command).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(
            written,
            "previous\nSET OK\nFound: 1\nInvalid command\nNot found\na\nEND LIST\n"
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_exit() {
        let node = node(Config::test_config());
        let input: &[u8] = b"SET a 1\nnonsense\nEXIT\nSET b 2\n";
        assert!(run(&node, input).await.unwrap());
        // leave clears local state and stops monitoring
        assert!(node.storage_snapshot().is_empty());
        assert!(node.heartbeat_peers().is_empty());
        assert_eq!(node.phase(), crate::node::NodePhase::Leaving);
    }

    #[tokio::test]
    async fn test_exit_in_a_ring_leaves_once() {
        let network = MemoryNetwork::new();
        let peer = |id: u64| {
            let node = Node::new(
                PeerInfo::new(format!("vm-{}", id), id, "mem"),
                Config::test_config(),
                Arc::new(network.clone()),
            );
            network.register(node.clone());
            node
        };
        let a = peer(10);
        let b = peer(50);
        a.join_peers(vec![]).await.unwrap();
        b.join_peers(vec![a.info().clone()]).await.unwrap();
        execute(&b, &Command::Set("k".into(), "v".into())).await.unwrap();

        let out = execute(&b, &Command::Exit).await.unwrap();
        assert_eq!(out, Output::default());
        assert!(b.heartbeat_peers().is_empty());
        assert!(b.storage_snapshot().is_empty());
        assert_eq!(a.neighbors().1.id, 10);
        assert_eq!(a.get("k").await.unwrap().as_deref(), Some("v"));
        a.shutdown();
    }
}
