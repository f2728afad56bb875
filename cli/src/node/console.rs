use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::Bytes;
use kadnode_network::{Dht, ID_LEN, KadId, Transport};

const HELP: &str = "\
put <content>  Stores the content and prints its hash.
get <hash>     Prints the content stored under the hash and the node it was retrieved from.
join <ip>      Joins the network through the node with the given IPv4 address.
forget <hash>  Stops refreshing the content stored under the hash.
help           Prints this message.
exit           Terminates the node.";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put(String),
    Get(KadId),
    Join(Ipv4Addr),
    Forget(KadId),
    Help,
    Exit,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (command, arg) = match s.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, Some(arg.trim())),
            None if s.is_empty() => return Err(CommandError::Blank),
            None => (s, None),
        };

        match (command.to_lowercase().as_str(), arg) {
            ("put", Some(content)) => Ok(Self::Put(content.to_owned())),
            ("get", Some(hash)) => parse_hash(hash).map(Self::Get),
            ("forget", Some(hash)) => parse_hash(hash).map(Self::Forget),
            ("join", Some(ip)) => ip
                .parse()
                .map(Self::Join)
                .map_err(|_e| CommandError::InvalidIp),
            ("help", None) => Ok(Self::Help),
            ("exit", None) => Ok(Self::Exit),
            _ => Err(CommandError::Unknown),
        }
    }
}

fn parse_hash(s: &str) -> Result<KadId, CommandError> {
    if s.len() != ID_LEN * 2 {
        return Err(CommandError::InvalidHashLength);
    }
    KadId::from_hex(s).map_err(|_e| CommandError::InvalidHash)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("blank input, try again")]
    Blank,
    #[error("invalid command, type help")]
    Unknown,
    #[error("invalid hash length")]
    InvalidHashLength,
    #[error("invalid hash")]
    InvalidHash,
    #[error("invalid IP address format")]
    InvalidIp,
}

/// Runs a command and returns the text to print.
pub async fn execute<T: Transport>(dht: &Dht<T>, command: Command) -> String {
    match command {
        Command::Put(content) => match dht.put(Bytes::from(content)).await {
            Ok(key) => key.to_string(),
            Err(e) => format!("failed to store content: {e}"),
        },
        Command::Get(key) => {
            let res = dht.get(&key).await;
            match (&res.value, res.contacts.first()) {
                (Some(value), Some(holder)) => format!(
                    "NodeID: {}  Content: {}",
                    holder.id,
                    String::from_utf8_lossy(value)
                ),
                (None, Some(closest)) => format!(
                    "NodeID: {}  Content: Hash value does not exist in the network",
                    closest.id
                ),
                _ => "NodeID: [NULL]  Content: Could not find node or data in the network"
                    .to_owned(),
            }
        }
        Command::Join(ip) => match dht.join(ip).await {
            Ok(()) => format!("Joined the network through {ip}"),
            Err(e) => e.to_string(),
        },
        Command::Forget(key) => {
            dht.forget(&key);
            format!("Forgot data with hash: {key}")
        }
        Command::Help => HELP.to_owned(),
        Command::Exit => "Exit".to_owned(),
    }
}
