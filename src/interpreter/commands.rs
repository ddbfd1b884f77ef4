//! The command table. Lookup is exact and first-match, in table order.

use tracing::debug;

use super::Call;
use super::error::{FatalError, Result};
use super::stack::StackValue;
use crate::host::Uid;
use crate::quant::{WEIGHT_SCALE, WEIGHT_TYPE};

pub type Handler = fn(&mut Call<'_, '_, '_>) -> Result<()>;

/// Storage indices holding a user's key pair.
pub const KEY_INDEX: (i32, i32) = (-1, -2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Always,
    /// Only when docs are enabled.
    Docs,
    /// Only in debug builds.
    Debug,
}

pub struct Command {
    pub name: &'static str,
    pub run: Handler,
    pub syntax: &'static str,
    pub help: &'static str,
    pub availability: Availability,
}

impl Command {
    fn available(&self, docs: bool) -> bool {
        match self.availability {
            Availability::Always => true,
            Availability::Docs => docs,
            Availability::Debug => cfg!(debug_assertions),
        }
    }
}

const fn cmd(name: &'static str, run: Handler, syntax: &'static str, help: &'static str) -> Command {
    Command { name, run, syntax, help, availability: Availability::Always }
}

pub static COMMANDS: &[Command] = &[
    cmd("int", cmd_int, "int:<a>", "push a as an int"),
    cmd("float", cmd_float, "float:<a>", "push a as a float"),
    cmd("dup", cmd_dup, "dup:<a>", "push a twice"),
    cmd("rpt", cmd_rpt, "rpt:<n>:<a>", "push a n times"),
    cmd("del", cmd_del, "del:<a>", "discard a"),
    cmd("drop", cmd_drop, "drop:<n>", "discard n arguments"),
    cmd("stack", cmd_stack, "stack:<a>", "push a unchanged"),
    cmd("addi", cmd_addi, "addi:<a>:<b>", "push a + b as ints"),
    cmd("addf", cmd_addf, "addf:<a>:<b>", "push a + b as floats"),
    cmd("muli", cmd_muli, "muli:<a>:<b>", "push a * b as ints"),
    cmd("mulf", cmd_mulf, "mulf:<a>:<b>", "push a * b as floats"),
    cmd("poly", cmd_poly, "poly:<n>:<x>:<c0>...", "push c0 + c1*x + ... + c(n-1)*x^(n-1)"),
    cmd("weight", cmd_weight, "weight:<base64>", "push the dot product of packed weights and stack values"),
    cmd("user", cmd_user, "user:<uid0>:<uid1>:<key0>:<key1>", "log in, registering the key on first use"),
    cmd("getn", cmd_getn, "getn:<index>", "push a stored number"),
    cmd("setn", cmd_setn, "setn:<index>:<value>", "store a number"),
    cmd("lockn", cmd_lockn, "lockn:<index>", "make a stored number read-only"),
    cmd("otp_init", cmd_otp_init, "otp_init:<uid0>:<uid1>", "create a one-time password secret"),
    cmd("otp_auth", cmd_otp_auth, "otp_auth:<uid0>:<uid1>:<code0>:<code1>", "log in with a one-time code"),
    cmd("otp_sync", cmd_otp_sync, "otp_sync:<uid0>:<uid1>", "push the one-time password counter"),
    cmd("inspect", cmd_inspect, "inspect:<n_int>:<n_float>", "report values to the host"),
    cmd("print", cmd_print, "print:<text>", "log text"),
    Command {
        name: "help",
        run: cmd_help,
        syntax: "help[:<command>]",
        help: "list commands or describe one",
        availability: Availability::Docs,
    },
    Command {
        name: "dbg_fail",
        run: cmd_dbg_fail,
        syntax: "dbg_fail",
        help: "abort with a fatal error",
        availability: Availability::Debug,
    },
];

pub fn lookup(name: &str, docs: bool) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name == name && c.available(docs))
}

fn cmd_int(c: &mut Call) -> Result<()> {
    let v = c.get_sint()?;
    c.put_int(v)
}

fn cmd_float(c: &mut Call) -> Result<()> {
    let v = c.get_sfloat()?;
    c.put_float(v)
}

fn cmd_dup(c: &mut Call) -> Result<()> {
    let v = c.get_value()?;
    c.put(v)?;
    c.put(v)
}

fn cmd_rpt(c: &mut Call) -> Result<()> {
    let count = c.get_uint()?;
    let v = c.get_value()?;
    for _ in 0..count.max(0) {
        c.put(v)?;
    }
    Ok(())
}

fn cmd_del(c: &mut Call) -> Result<()> {
    c.get_value()?;
    Ok(())
}

fn cmd_drop(c: &mut Call) -> Result<()> {
    let count = c.get_uint()?;
    for _ in 0..count.max(0) {
        if c.args_exhausted() {
            break;
        }
        c.get_value()?;
    }
    Ok(())
}

fn cmd_stack(c: &mut Call) -> Result<()> {
    let v = c.get_value()?;
    c.put(v)
}

fn cmd_addi(c: &mut Call) -> Result<()> {
    let a = c.get_sint()?;
    let b = c.get_sint()?;
    c.put_int(a.wrapping_add(b))
}

fn cmd_addf(c: &mut Call) -> Result<()> {
    let a = c.get_sfloat()?;
    let b = c.get_sfloat()?;
    c.put_float(a + b)
}

fn cmd_muli(c: &mut Call) -> Result<()> {
    let a = c.get_sint()?;
    let b = c.get_sint()?;
    c.put_int(a.wrapping_mul(b))
}

fn cmd_mulf(c: &mut Call) -> Result<()> {
    let a = c.get_sfloat()?;
    let b = c.get_sfloat()?;
    c.put_float(a * b)
}

fn cmd_poly(c: &mut Call) -> Result<()> {
    let count = c.get_uint()?;
    let x = c.get_sfloat()?;
    let mut sum = 0.0;
    let mut power = 1.0;
    for _ in 0..count.max(0) {
        sum += c.get_sfloat()? * power;
        power *= x;
    }
    c.put_float(sum)
}

fn cmd_weight(c: &mut Call) -> Result<()> {
    let mut raw = c.raw_args();
    raw.decompress_base64()?;
    raw.set_quant_type(WEIGHT_TYPE);
    raw.set_quant_scale(WEIGHT_SCALE);

    let mut sum = 0.0;
    while raw.remaining() > 0 {
        let coeff = raw.get_quant()?;
        sum += coeff * c.get_sfloat()?;
    }
    c.put_float(sum)
}

fn get_uid(c: &mut Call) -> Result<Uid> {
    let uid0 = c.get_uint()?;
    let uid1 = c.get_uint()?;
    Ok(Uid(uid0, uid1))
}

fn is_unset(v: StackValue) -> bool {
    match v {
        StackValue::Int(i) => i == 0,
        StackValue::Float(f) => f == 0.0,
    }
}

fn cmd_user(c: &mut Call) -> Result<()> {
    let uid = get_uid(c)?;
    let key0 = c.get_uint()?;
    let key1 = c.get_uint()?;

    let host = c.host();
    let stored0 = host.get_number(uid, KEY_INDEX.0, "user")?;
    let stored1 = host.get_number(uid, KEY_INDEX.1, "user")?;

    let ok = if is_unset(stored0) && is_unset(stored1) {
        debug!(uid0 = uid.0, uid1 = uid.1, "registering user");
        host.set_number(uid, KEY_INDEX.0, StackValue::Int(key0), "user")?;
        host.set_number(uid, KEY_INDEX.1, StackValue::Int(key1), "user")?;
        true
    } else {
        stored0 == StackValue::Int(key0) && stored1 == StackValue::Int(key1)
    };

    if ok {
        c.login(uid);
    }
    c.put_int(ok as i32)
}

fn cmd_getn(c: &mut Call) -> Result<()> {
    let index = c.get_uint()?;
    let session = c.session();
    if !session.authenticated {
        return c.put_int(0);
    }
    let v = c.host().get_number(session.uid, index, "getn")?;
    c.put(v)
}

fn cmd_setn(c: &mut Call) -> Result<()> {
    let index = c.get_uint()?;
    let value = c.get_value()?;
    let session = c.session();
    if session.authenticated {
        let status = c.host().set_number(session.uid, index, value, "setn")?;
        if status == 0 {
            debug!(index, "store refused");
        }
    }
    Ok(())
}

fn cmd_lockn(c: &mut Call) -> Result<()> {
    let index = c.get_uint()?;
    let session = c.session();
    if session.authenticated {
        c.host().lock_number(session.uid, index, "lockn")?;
    }
    Ok(())
}

fn cmd_otp_init(c: &mut Call) -> Result<()> {
    let uid = get_uid(c)?;
    let (secret0, secret1) = c.host().otp_init(uid)?;
    c.put_int(secret0)?;
    c.put_int(secret1)
}

fn cmd_otp_auth(c: &mut Call) -> Result<()> {
    let uid = get_uid(c)?;
    let code0 = c.get_uint()?;
    let code1 = c.get_uint()?;
    c.mark_otp_touched();
    let ok = c.host().otp_auth(uid, (code0, code1))?;
    if ok {
        c.login(uid);
    }
    c.put_int(ok as i32)
}

fn cmd_otp_sync(c: &mut Call) -> Result<()> {
    let uid = get_uid(c)?;
    c.mark_otp_touched();
    let counter = c.host().otp_sync(uid)?;
    c.put_int(counter)
}

fn cmd_inspect(c: &mut Call) -> Result<()> {
    let n_int = c.get_uint()?;
    let n_float = c.get_uint()?;
    for _ in 0..n_int.max(0) {
        let v = c.get_sint()?;
        c.host().inspect(StackValue::Int(v))?;
    }
    for _ in 0..n_float.max(0) {
        let v = c.get_sfloat()?;
        c.host().inspect(StackValue::Float(v))?;
    }
    Ok(())
}

fn cmd_print(c: &mut Call) -> Result<()> {
    let raw = c.raw_args();
    c.host().log(&raw.text())?;
    Ok(())
}

fn cmd_help(c: &mut Call) -> Result<()> {
    let topic = c.raw_args().text().into_owned();
    let docs = c.docs();
    let line = if topic.is_empty() {
        let names: Vec<&str> = COMMANDS.iter().filter(|cmd| cmd.available(docs)).map(|cmd| cmd.name).collect();
        format!("usage: <command>[:<code><payload>]... commands: {}", names.join(" "))
    } else {
        match lookup(&topic, docs) {
            Some(cmd) => format!("{} - {}", cmd.syntax, cmd.help),
            None => format!("no such command: {topic}"),
        }
    };
    c.host().log(&line)?;
    Ok(())
}

fn cmd_dbg_fail(c: &mut Call) -> Result<()> {
    c.host().fail("dbg_fail")?;
    Err(FatalError::Requested.into())
}
