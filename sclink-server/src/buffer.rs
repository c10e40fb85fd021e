use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use sclink_osc::Message;

use crate::error::{SessionError, SessionResult};
use crate::lifecycle::{Dispatch, Lifecycle, LifecycleState, Release};
use crate::session::Session;
use crate::sync::lock;

/// Buffer geometry reported by `/b_info`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BufferInfo {
    pub frames: i32,
    pub channels: i32,
    pub sample_rate: f32,
}

impl BufferInfo {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate > 0.0 {
            self.frames as f32 / self.sample_rate
        } else {
            0.0
        }
    }
}

/// Handle to a server sample buffer.
///
/// The buffer number is reserved when the handle is built. Allocation is
/// asynchronous: commands issued before the server's `/done` are queued,
/// and once it arrives the buffer is queried so [`Buffer::info`] fills in.
pub struct Buffer {
    core: Arc<BufferCore>,
}

pub(crate) struct BufferCore {
    session: Session,
    lifecycle: Mutex<Lifecycle>,
    info: Mutex<Option<BufferInfo>>,
    path: Mutex<Option<PathBuf>>,
}

impl Buffer {
    pub fn new(session: &Session) -> SessionResult<Self> {
        let bufnum = session.alloc_buffer_id()?;
        let core = Arc::new(BufferCore {
            session: session.clone(),
            lifecycle: Mutex::new(Lifecycle::new(bufnum)),
            info: Mutex::new(None),
            path: Mutex::new(None),
        });
        session.attach_buffer(bufnum, Arc::downgrade(&core));
        Ok(Self { core })
    }

    pub fn bufnum(&self) -> i32 {
        self.core.bufnum()
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.core.lifecycle).state()
    }

    /// Geometry from the last `/b_info`, once the server has reported it.
    pub fn info(&self) -> Option<BufferInfo> {
        *lock(&self.core.info)
    }

    pub fn is_ready(&self) -> bool {
        self.info().is_some()
    }

    /// Sound file this buffer was read from.
    pub fn path(&self) -> Option<PathBuf> {
        lock(&self.core.path).clone()
    }

    /// /b_alloc bufnum numFrames numChannels
    pub fn alloc(&self, frames: i32, channels: i32) -> SessionResult {
        self.core
            .create(|bufnum| Message::new("/b_alloc").arg(bufnum).arg(frames).arg(channels))
    }

    /// /b_allocRead bufnum path startFrame numFrames
    /// Reads the whole file.
    pub fn read(&self, path: impl AsRef<Path>) -> SessionResult {
        let path = path.as_ref();
        let name = utf8(path)?;
        self.core.create(|bufnum| {
            *lock(&self.core.path) = Some(path.to_path_buf());
            Message::new("/b_allocRead")
                .arg(bufnum)
                .arg(name)
                .arg(0) // start frame
                .arg(0) // 0 = read entire file
        })
    }

    /// /b_allocReadChannel bufnum path startFrame numFrames channels...
    pub fn read_channels(&self, path: impl AsRef<Path>, channels: &[i32]) -> SessionResult {
        let path = path.as_ref();
        let name = utf8(path)?;
        self.core.create(|bufnum| {
            *lock(&self.core.path) = Some(path.to_path_buf());
            let mut msg = Message::new("/b_allocReadChannel")
                .arg(bufnum)
                .arg(name)
                .arg(0)
                .arg(0);
            for ch in channels {
                msg.push(*ch);
            }
            msg
        })
    }

    /// /b_query bufnum
    /// Results come back asynchronously via /b_info.
    pub fn query(&self) -> SessionResult {
        self.core.mutate(Message::new("/b_query").arg(self.bufnum()))
    }

    /// /b_zero bufnum
    pub fn zero(&self) -> SessionResult {
        self.core.mutate(Message::new("/b_zero").arg(self.bufnum()))
    }

    /// /b_free bufnum
    /// Idempotent; the buffer number goes back to the allocator.
    pub fn free(&self) -> SessionResult {
        self.core.free()
    }
}

impl BufferCore {
    fn bufnum(&self) -> i32 {
        lock(&self.lifecycle).id()
    }

    fn create(&self, build: impl FnOnce(i32) -> Message) -> SessionResult {
        let mut lifecycle = lock(&self.lifecycle);
        let bufnum = lifecycle.id();
        if !lifecycle.begin_create() {
            warn!(target: "server::buffer", "buffer {bufnum} is {:?}, not allocating again", lifecycle.state());
            return Ok(());
        }
        *lock(&self.info) = None;
        self.session.send(build(bufnum))
    }

    fn mutate(&self, msg: Message) -> SessionResult {
        let mut lifecycle = lock(&self.lifecycle);
        match lifecycle.buffer_or_flush(msg) {
            Dispatch::Send(msg) => self.session.send(msg),
            Dispatch::Buffered => Ok(()),
            Dispatch::Dropped(msg) => {
                debug!(target: "server::buffer", "buffer {} is freed, dropping {}", lifecycle.id(), msg.addr);
                Ok(())
            }
        }
    }

    fn free(&self) -> SessionResult {
        let mut lifecycle = lock(&self.lifecycle);
        let bufnum = lifecycle.id();
        let result = match lifecycle.release() {
            Release::AlreadyFreed => return Ok(()),
            Release::Discard => Ok(()),
            Release::Teardown { pending } => {
                let free = Message::new("/b_free").arg(bufnum);
                self.session.send_all(pending.into_iter().chain(Some(free)))
            }
        };
        self.session.detach_buffer(bufnum);
        self.session.free_buffer_id(bufnum);
        result
    }

    /// Allocation confirmed by `/done`: flush queued commands, then query.
    pub(crate) fn acknowledge(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        let bufnum = lifecycle.id();
        if lifecycle.state() == LifecycleState::Freed {
            return;
        }
        let pending = lifecycle.acknowledge();
        info!(target: "server::buffer", "buffer {bufnum} allocated");
        for msg in pending {
            if let Err(e) = self.session.send(msg) {
                warn!(target: "server::buffer", "buffer {bufnum}: queued message not sent: {e}");
            }
        }
        if let Err(e) = self.session.send(Message::new("/b_query").arg(bufnum)) {
            warn!(target: "server::buffer", "buffer {bufnum}: query not sent: {e}");
        }
    }

    pub(crate) fn apply_info(&self, info: BufferInfo) {
        debug!(target: "server::buffer", "buffer {}: {info:?}", self.bufnum());
        *lock(&self.info) = Some(info);
    }
}

impl Drop for BufferCore {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            warn!(target: "server::buffer", "buffer {}: free on drop failed: {e}", self.bufnum());
        }
    }
}

fn utf8(path: &Path) -> SessionResult<&str> {
    path.to_str()
        .ok_or_else(|| SessionError::NonUtf8Path(path.to_path_buf()))
}
