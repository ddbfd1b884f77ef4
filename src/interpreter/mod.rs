pub mod args;
pub mod commands;
pub mod error;
pub mod raw;
pub mod response;
pub mod stack;

use tracing::{debug, warn};

use crate::config::Config;
use crate::host::{Host, Uid};
use crate::lexer;
use crate::quant::{QuantConfig, QuantRegister, QuantType};
use args::ArgCursor;
use error::{EngineError, FatalError, Result, SyntaxError};
use raw::RawArgs;
use response::Response;
use stack::{StackValue, ValueStack};

/// Who the current request is logged in as, if anyone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    pub authenticated: bool,
    pub uid: Uid,
}

/// Request-scoped interpreter state. Nothing survives from one request to
/// the next except what the host stores.
pub struct Engine<'h> {
    host: &'h mut dyn Host,
    stack: ValueStack,
    quant: QuantRegister,
    session: Session,
    otp_touched: bool,
    error: Option<EngineError>,
    docs: bool,
}

impl<'h> Engine<'h> {
    pub fn new(host: &'h mut dyn Host) -> Self {
        Engine {
            host,
            stack: ValueStack::new(),
            quant: QuantRegister::default(),
            session: Session::default(),
            otp_touched: false,
            error: None,
            docs: true,
        }
    }

    /// Whether `help` is available.
    pub fn with_docs(mut self, docs: bool) -> Self {
        self.docs = docs;
        self
    }

    pub fn stack(&self) -> &ValueStack {
        &self.stack
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    /// Execute every command of `request` until the end or the first error.
    pub fn run(&mut self, request: &str) {
        debug!(request, "run request");
        self.quant.set(QuantConfig::new(0, QuantType::UInt16));

        for token in lexer::commands(request) {
            let result = token
                .map_err(EngineError::from)
                .and_then(|cmd| {
                    self.run_command(cmd.name, cmd.args)
                        .inspect_err(|_| debug!(at = cmd.span.start, name = cmd.name, "command failed"))
                });
            if let Err(e) = result {
                self.latch(e);
                break;
            }
            if self.otp_touched {
                self.otp_touched = false;
                if let Err(e) = self.host.invalidate() {
                    self.latch(e.into());
                    break;
                }
            }
        }
    }

    fn run_command(&mut self, name: &str, args: &str) -> Result<()> {
        let Some(command) = commands::lookup(name, self.docs) else {
            debug!(name, "unknown command");
            return Err(SyntaxError::InvalidCommand.into());
        };
        debug!(name, args, depth = self.stack.len(), "dispatch");
        self.stack.begin_command();
        let mut call = Call { engine: self, args: ArgCursor::new(args) };
        (command.run)(&mut call)
    }

    /// First error wins.
    fn latch(&mut self, e: EngineError) {
        warn!(error = %e, "request halted");
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    pub fn response(&self) -> Response {
        match &self.error {
            Some(e) => Response::Error(e.to_string()),
            None => Response::Out(self.stack.iter_top_down().copied().collect()),
        }
    }
}

/// One command invocation: the engine plus the command's argument cursor.
pub struct Call<'c, 'h, 't> {
    engine: &'c mut Engine<'h>,
    args: ArgCursor<'t>,
}

impl<'c, 'h, 't> Call<'c, 'h, 't> {
    fn next_arg(&mut self) -> Result<()> {
        self.args.advance(&mut self.engine.stack, &self.engine.quant)?;
        Ok(())
    }

    pub fn get_value(&mut self) -> Result<StackValue> {
        self.next_arg()?;
        Ok(self.args.read_value(&self.engine.quant))
    }

    pub fn get_sint(&mut self) -> Result<i32> {
        self.next_arg()?;
        Ok(self.args.read_sint(&self.engine.quant))
    }

    pub fn get_uint(&mut self) -> Result<i32> {
        self.next_arg()?;
        Ok(self.args.read_uint(&self.engine.quant))
    }

    pub fn get_sfloat(&mut self) -> Result<f32> {
        self.next_arg()?;
        Ok(self.args.read_sfloat(&self.engine.quant))
    }

    pub fn get_ufloat(&mut self) -> Result<f32> {
        self.next_arg()?;
        Ok(self.args.read_ufloat(&self.engine.quant))
    }

    /// Every further fetch would yield Int 0 without touching anything.
    pub fn args_exhausted(&self) -> bool {
        self.args.is_exhausted() && self.engine.stack.arg_size() == 0
    }

    /// Hand the rest of the suffix to a raw reader.
    pub fn raw_args(&mut self) -> RawArgs {
        let mut raw = RawArgs::new(&self.engine.quant);
        raw.set_arg_text(self.args.take_raw());
        raw
    }

    pub fn put(&mut self, value: StackValue) -> Result<()> {
        self.engine.stack.push(value)?;
        Ok(())
    }

    pub fn put_int(&mut self, value: i32) -> Result<()> {
        self.put(StackValue::Int(value))
    }

    pub fn put_float(&mut self, value: f32) -> Result<()> {
        self.put(StackValue::Float(value))
    }

    pub fn host(&mut self) -> &mut (dyn Host + 'h) {
        &mut *self.engine.host
    }

    pub fn session(&self) -> Session {
        self.engine.session
    }

    pub fn login(&mut self, uid: Uid) {
        debug!(uid0 = uid.0, uid1 = uid.1, "session authenticated");
        self.engine.session = Session { authenticated: true, uid };
    }

    /// Ask the loop to notify the host once this command finishes.
    pub fn mark_otp_touched(&mut self) {
        self.engine.otp_touched = true;
    }

    pub fn docs(&self) -> bool {
        self.engine.docs
    }
}

/// Run one request against `host`. Only fatal conditions come back as `Err`;
/// everything else is folded into the response.
pub fn process_request(
    host: &mut dyn Host,
    request: &str,
    config: &Config,
) -> std::result::Result<Response, FatalError> {
    let mut engine = Engine::new(host).with_docs(config.docs);
    engine.run(request);
    match engine.error() {
        Some(EngineError::Fatal(fatal)) => Err(fatal.clone()),
        _ => Ok(engine.response()),
    }
}
