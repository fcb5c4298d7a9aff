//! Server entry and RESP TCP front end

use crate::commands::{command_table, CommandDef, CommandError};
use crate::segment::SegmentMgr;
use crate::session::Session;
use resp::{RespReader, RespWriter, RespValue};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::split;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use storage::KvEngine;

/// Shared server state: the engine, the segment manager and the command
/// table. One instance serves every connection.
pub struct ServerEntry {
    segment_mgr: SegmentMgr,
    table: HashMap<&'static str, CommandDef>,
}

impl ServerEntry {
    pub fn new(chunk_count: u32) -> Self {
        let store = KvEngine::new();
        let table = command_table()
            .into_iter()
            .map(|def| (def.name, def))
            .collect();
        Self {
            segment_mgr: SegmentMgr::new(store, chunk_count),
            table,
        }
    }

    pub fn segment_mgr(&self) -> &SegmentMgr {
        &self.segment_mgr
    }

    /// Run one command; every failure becomes a RESP error reply.
    pub fn execute(&self, args: Vec<Vec<u8>>) -> RespValue {
        if args.is_empty() {
            return RespValue::Error("ERR empty command".to_string());
        }
        let name = String::from_utf8_lossy(&args[0]).to_lowercase();
        let def = match self.table.get(name.as_str()) {
            Some(def) => def,
            None => {
                return RespValue::Error(CommandError::UnknownCommand(name).to_string());
            }
        };
        if !def.arity_ok(args.len()) {
            return RespValue::Error(CommandError::WrongArity(def.name).to_string());
        }
        let mut sess = Session::new(args);
        match (def.handler)(self, &mut sess) {
            Ok(reply) => reply,
            Err(e) => RespValue::Error(e.to_string()),
        }
    }
}

/// RESP protocol server.
pub struct RespServer {
    entry: Arc<ServerEntry>,
    addr: SocketAddr,
}

impl RespServer {
    pub fn new(entry: Arc<ServerEntry>, addr: SocketAddr) -> Self {
        Self { entry, addr }
    }

    pub async fn start(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("listening on {}", self.addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!("client connected from {}", peer);
                    let entry = self.entry.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, entry).await {
                            warn!("client {} closed with error: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                }
            }
        }
    }
}

async fn handle_client(stream: TcpStream, entry: Arc<ServerEntry>) -> Result<(), resp::RespError> {
    let (reader, writer) = split(stream);
    let mut reader = RespReader::new(reader);
    let mut writer = RespWriter::new(writer);

    loop {
        let frame = match reader.read_value().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => {
                let reply = RespValue::Error(format!("ERR {}", e));
                writer.write_value(&reply).await?;
                return Err(e);
            }
        };
        let reply = match frame.to_args() {
            Some(args) if !args.is_empty() => entry.execute(args),
            _ => RespValue::Error("ERR invalid request".to_string()),
        };
        writer.write_value(&reply).await?;
    }
}
