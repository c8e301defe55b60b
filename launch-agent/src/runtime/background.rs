// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use async_channel::{Receiver, Sender};
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::FutureObj;
use futures::task::{LocalSpawnExt, Spawn, SpawnError};
use log::debug;
use std::thread::{self, JoinHandle};

/// Executor thread that hosts background loops such as job-set sync loops.
#[derive(Debug)]
pub struct BackgroundRuntime {
    thread_handle: Option<JoinHandle<()>>,
    tx: Option<Sender<FutureObj<'static, ()>>>,
}

impl Default for BackgroundRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundRuntime {
    /// Starts the runtime thread.
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();

        let thread_handle = thread::spawn(move || {
            let mut pool = LocalPool::new();
            let spawner = pool.spawner();

            if let Err(e) = spawner.spawn_local(intake_loop(spawner.clone(), rx)) {
                log::error!("Failed to start the runtime intake loop: {e}");
                return;
            }
            pool.run(); // blocks until all tasks complete
        });

        Self {
            thread_handle: Some(thread_handle),
            tx: Some(tx),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Refuses new tasks. Running tasks are left alone.
    pub fn close(&mut self) {
        self.tx = None;
        debug!("Runtime closed for new tasks");
    }

    /// Closes the runtime and blocks until every hosted task has returned.
    pub fn wait_until_finished(&mut self) {
        self.close();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Runtime thread panicked");
            }
        }
    }
}

impl Spawn for BackgroundRuntime {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        let tx = self.tx.as_ref().ok_or_else(SpawnError::shutdown)?;
        tx.try_send(future).map_err(|_| SpawnError::shutdown())
    }

    fn status(&self) -> Result<(), SpawnError> {
        if self.tx.is_some() {
            Ok(())
        } else {
            Err(SpawnError::shutdown())
        }
    }
}

/// Moves incoming tasks onto the pool until every sender is gone.
async fn intake_loop(spawner: LocalSpawner, rx: Receiver<FutureObj<'static, ()>>) {
    while let Ok(future) = rx.recv().await {
        if let Err(e) = spawner.spawn_obj(future) {
            log::warn!("Failed to spawn task on runtime: {e}");
        }
    }
    log::info!("Runtime intake closed, draining remaining tasks");
}
