//! Per-command session state

/// Execution context carried across one command invocation.
#[derive(Debug, Clone)]
pub struct SessionCtx {
    db_id: u32,
    version_ep: u64,
}

impl SessionCtx {
    pub fn new(db_id: u32, version_ep: u64) -> Self {
        Self { db_id, version_ep }
    }

    pub fn db_id(&self) -> u32 {
        self.db_id
    }

    /// Switch the session to another logical db (used by batch commands
    /// that carry a db id per key).
    pub fn set_db_id(&mut self, db_id: u32) {
        self.db_id = db_id;
    }

    pub fn version_ep(&self) -> u64 {
        self.version_ep
    }
}

/// One client command in flight: the argument vector plus its context.
#[derive(Debug)]
pub struct Session {
    args: Vec<Vec<u8>>,
    ctx: SessionCtx,
}

impl Session {
    pub fn new(args: Vec<Vec<u8>>) -> Self {
        Self {
            args,
            ctx: SessionCtx::new(0, 0),
        }
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn ctx(&self) -> &SessionCtx {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut SessionCtx {
        &mut self.ctx
    }
}
