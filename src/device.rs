//! Device main loop: announce readiness, then answer `RQST` with `RESP`
//! until the host hangs up.

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::host::{Host, HostError, Message, ident};
use crate::interpreter::error::FatalError;
use crate::interpreter::process_request;
use crate::interpreter::response::Response;

fn transport(e: HostError) -> FatalError {
    FatalError::Transport(e.to_string())
}

pub fn serve<H: Host>(host: &mut H, config: &Config) -> Result<(), FatalError> {
    host.send(&Message::empty(ident::REDY)).map_err(transport)?;
    info!("device ready");
    loop {
        let msg = match host.recv() {
            Ok(msg) => msg,
            // idle; keep polling
            Err(HostError::Timeout) => continue,
            Err(HostError::Closed) => {
                info!("host closed the link");
                return Ok(());
            }
            Err(e) => return Err(transport(e)),
        };
        handle(host, &msg, config)?;
    }
}

/// Run one message from the host. Anything but `RQST` is fatal.
pub fn handle(host: &mut dyn Host, msg: &Message, config: &Config) -> Result<Response, FatalError> {
    if msg.ident != ident::RQST {
        let fatal = FatalError::UnexpectedIdent(msg.ident_str());
        warn!(ident = %msg.ident_str(), "unexpected message");
        let _ = host.fail(&fatal.to_string());
        return Err(fatal);
    }

    let text = String::from_utf8_lossy(&msg.payload);
    debug!(len = msg.payload.len(), "request");
    let response = process_request(host, &text, config)?;
    let line = format!("{response}\n");
    host.send(&Message::new(ident::RESP, line.into_bytes())).map_err(transport)?;
    debug!(ok = response.is_ok(), "response sent");
    Ok(response)
}
