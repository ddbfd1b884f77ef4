use super::stack::StackValue;

/// What a request produces: the final stack (top first) or the latched error.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Out(Vec<StackValue>),
    Error(String),
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Out(_))
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Response::Out(values) => {
                write!(f, "out:")?;
                for v in values {
                    write!(f, " {}", v)?;
                }
                Ok(())
            }
            Response::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// `printf("%.{precision}g")` for a single-precision value.
pub fn format_general(value: f32, precision: usize) -> String {
    let v = value as f64;
    if v.is_nan() {
        return if v.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if v.is_infinite() {
        return if v < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let p = precision.max(1);
    let sci = format!("{:.*e}", p - 1, v);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= p as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let decimals = (p as i32 - 1 - exp) as usize;
        trim_fraction(&format!("{:.*}", decimals, v)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
