use crate::backend::{Control, Topology};
use crate::error::{CommandError, QueryError};
use crate::sink::{Sink, StreamRoute};
use async_trait::async_trait;
use pulse::callbacks::ListResult;
use pulse::context::{Context, FlagSet, State};
use pulse::mainloop::standard::{IterateResult, Mainloop};
use std::cell::RefCell;
use std::rc::Rc;

/// Audio server backend speaking the native protocol through libpulse.
/// Every operation runs a short-lived mainloop session on the blocking
/// pool; the mainloop types are not `Send`, so nothing of a session
/// outlives its closure.
pub struct NativeClient;

impl NativeClient {
    pub fn new() -> Self {
        Self
    }
}

struct Session {
    mainloop: Mainloop,
    context: Context,
}

impl Session {
    fn connect() -> Result<Session, String> {
        let mut mainloop =
            Mainloop::new().ok_or_else(|| "could not create a PulseAudio mainloop".to_string())?;
        let mut context = Context::new(&mainloop, "sinkswap")
            .ok_or_else(|| "could not create a PulseAudio context".to_string())?;

        context
            .connect(None, FlagSet::NOAUTOSPAWN, None)
            .map_err(|e| format!("connection failed: {:?}", e))?;

        loop {
            match mainloop.iterate(true) {
                IterateResult::Quit(_) | IterateResult::Err(_) => {
                    return Err("mainloop gave up while connecting".to_string());
                }
                IterateResult::Success(_) => {}
            }

            match context.get_state() {
                State::Ready => break,
                State::Failed | State::Terminated => {
                    return Err("context failed or terminated while connecting".to_string());
                }
                _ => {}
            }
        }

        Ok(Session { mainloop, context })
    }

    /// Iterates the mainloop until a callback deposits a value in `slot`.
    fn drive<T>(&mut self, slot: &Rc<RefCell<Option<T>>>, what: &str) -> Result<T, String> {
        loop {
            if let Some(value) = slot.borrow_mut().take() {
                return Ok(value);
            }
            match self.mainloop.iterate(true) {
                IterateResult::Quit(_) | IterateResult::Err(_) => {
                    return Err(format!("mainloop gave up while {}", what));
                }
                IterateResult::Success(_) => {}
            }
        }
    }

    fn sinks(&mut self) -> Result<Vec<Sink>, String> {
        let done: Rc<RefCell<Option<Result<(), ()>>>> = Rc::new(RefCell::new(None));
        let collected = Rc::new(RefCell::new(Vec::new()));

        let introspect = self.context.introspect();
        let _op = {
            let done = done.clone();
            let collected = collected.clone();
            introspect.get_sink_info_list(move |result| match result {
                ListResult::Item(item) => {
                    let name = item
                        .description
                        .as_ref()
                        .or_else(|| item.name.as_ref())
                        .map(|value| value.to_string())
                        .unwrap_or_else(|| format!("sink {}", item.index));
                    collected.borrow_mut().push(Sink {
                        id: item.index,
                        name,
                        ordinal: item.index,
                    });
                }
                ListResult::End => *done.borrow_mut() = Some(Ok(())),
                ListResult::Error => *done.borrow_mut() = Some(Err(())),
            })
        };

        self.drive(&done, "listing sinks")?
            .map_err(|_| "sink listing aborted by the server".to_string())?;

        let mut sinks = std::mem::take(&mut *collected.borrow_mut());
        sinks.sort_by_key(|s| s.ordinal);
        Ok(sinks)
    }

    fn stream_routes(&mut self) -> Result<Vec<StreamRoute>, String> {
        let done: Rc<RefCell<Option<Result<(), ()>>>> = Rc::new(RefCell::new(None));
        let collected = Rc::new(RefCell::new(Vec::new()));

        let introspect = self.context.introspect();
        let _op = {
            let done = done.clone();
            let collected = collected.clone();
            introspect.get_sink_input_info_list(move |result| match result {
                ListResult::Item(item) => collected.borrow_mut().push(StreamRoute {
                    id: item.index,
                    sink: item.sink,
                }),
                ListResult::End => *done.borrow_mut() = Some(Ok(())),
                ListResult::Error => *done.borrow_mut() = Some(Err(())),
            })
        };

        self.drive(&done, "listing sink inputs")?
            .map_err(|_| "sink input listing aborted by the server".to_string())?;

        let result = std::mem::take(&mut *collected.borrow_mut());
        Ok(result)
    }

    /// The server-side name of the sink with the given index, if present.
    /// The default-sink command takes a name, not an index.
    fn sink_name(&mut self, index: u32) -> Result<Option<String>, String> {
        let done: Rc<RefCell<Option<Result<(), ()>>>> = Rc::new(RefCell::new(None));
        let name = Rc::new(RefCell::new(None));

        let introspect = self.context.introspect();
        let _op = {
            let done = done.clone();
            let name = name.clone();
            introspect.get_sink_info_by_index(index, move |result| match result {
                ListResult::Item(item) => {
                    *name.borrow_mut() = item.name.as_ref().map(|value| value.to_string());
                }
                ListResult::End => *done.borrow_mut() = Some(Ok(())),
                ListResult::Error => *done.borrow_mut() = Some(Err(())),
            })
        };

        self.drive(&done, "resolving a sink name")?
            .map_err(|_| format!("lookup of sink {} aborted by the server", index))?;

        let result = name.borrow_mut().take();
        Ok(result)
    }

    fn set_default(&mut self, name: &str) -> Result<bool, String> {
        let done = Rc::new(RefCell::new(None));
        let _op = {
            let done = done.clone();
            self.context
                .set_default_sink(name, move |ok| *done.borrow_mut() = Some(ok))
        };
        self.drive(&done, "setting the default sink")
    }

    fn move_stream(&mut self, stream: u32, sink: u32) -> Result<bool, String> {
        let done = Rc::new(RefCell::new(None));
        let mut introspect = self.context.introspect();
        let _op = {
            let done = done.clone();
            introspect.move_sink_input_by_index(
                stream,
                sink,
                Some(Box::new(move |ok| *done.borrow_mut() = Some(ok))),
            )
        };
        self.drive(&done, "moving a sink input")
    }
}

async fn run_query<T, F>(work: F) -> Result<T, QueryError>
where
    T: Send + 'static,
    F: FnOnce(&mut Session) -> Result<T, String> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut session = Session::connect()?;
        work(&mut session)
    })
    .await
    .map_err(|e| QueryError::CommandUnavailable(format!("blocking task failed: {}", e)))?
    .map_err(QueryError::CommandUnavailable)
}

async fn run_command<F>(work: F) -> Result<(), CommandError>
where
    F: FnOnce(&mut Session) -> Result<(), CommandError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut session = Session::connect().map_err(CommandError::Other)?;
        work(&mut session)
    })
    .await
    .map_err(|e| CommandError::Other(format!("blocking task failed: {}", e)))?
}

#[async_trait]
impl Topology for NativeClient {
    async fn sinks(&self) -> Result<Vec<Sink>, QueryError> {
        run_query(|session| session.sinks()).await
    }

    async fn stream_routes(&self) -> Result<Vec<StreamRoute>, QueryError> {
        run_query(|session| session.stream_routes()).await
    }
}

#[async_trait]
impl Control for NativeClient {
    async fn set_default_sink(&self, sink: u32) -> Result<(), CommandError> {
        run_command(move |session| {
            let name = session
                .sink_name(sink)
                .map_err(CommandError::Other)?
                .ok_or_else(|| {
                    CommandError::ServerRejected(format!("sink {} is not present", sink))
                })?;

            if session.set_default(&name).map_err(CommandError::Other)? {
                Ok(())
            } else {
                Err(CommandError::ServerRejected(format!(
                    "could not make {:?} the default sink",
                    name
                )))
            }
        })
        .await
    }

    async fn move_stream(&self, stream: u32, sink: u32) -> Result<(), CommandError> {
        run_command(move |session| {
            if session.move_stream(stream, sink).map_err(CommandError::Other)? {
                return Ok(());
            }

            // A refused move usually means the stream already ended;
            // re-list to confirm before blaming the server.
            match session.stream_routes() {
                Ok(routes) if routes.iter().all(|r| r.id != stream) => {
                    Err(CommandError::StreamGone)
                }
                _ => Err(CommandError::ServerRejected(format!(
                    "could not move stream {} to sink {}",
                    stream, sink
                ))),
            }
        })
        .await
    }
}
