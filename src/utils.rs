/// Object key utility functions / 对象键工具函数

/// Delimiter used to model a directory structure in a bucket / 目录分隔符
pub const DIR_DELIM: char = '/';

/// Remove one leading `/` from an object name / 去掉开头的一个 `/`
pub fn trim_leading(name: &str) -> &str {
    name.strip_prefix(DIR_DELIM).unwrap_or(name)
}

/// Keep only the last path segment / 只保留最后一段
/// "a/b/c.txt" -> "c.txt", "a/b/" -> ""
pub fn trim_name(key: &str) -> &str {
    match key.rfind(DIR_DELIM) {
        Some(pos) => &key[pos + 1..],
        None => key,
    }
}

/// Turn a list prefix into a directory prefix ending with exactly one `/`.
/// An empty prefix stays empty (bucket root). / 规范化目录前缀
pub fn dir_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }
    let mut dir = prefix.trim_end_matches(DIR_DELIM).to_string();
    dir.push(DIR_DELIM);
    dir
}

/// Go-style duration strings ("90s", "2m", "1m30s", "500ms") for serde / Go 风格时长
///
/// Plain integers are read as nanoseconds, like a Go `time.Duration`.
pub mod go_duration {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        d.deserialize_any(GoDurationVisitor)
    }

    struct GoDurationVisitor;

    impl<'de> Visitor<'de> for GoDurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration such as \"90s\" or \"1m30s\"")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            parse(v).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_nanos(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_nanos)
                .map_err(|_| E::custom(format!("negative duration: {}", v)))
        }
    }

    /// Parse a Go duration string / 解析时长字符串
    pub fn parse(input: &str) -> Result<Duration, String> {
        let s = input.trim();
        if s == "0" {
            return Ok(Duration::ZERO);
        }
        if s.is_empty() {
            return Err("empty duration".to_string());
        }

        let mut total = 0f64;
        let mut rest = s;
        while !rest.is_empty() {
            let num_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            if num_len == 0 {
                return Err(format!("invalid duration {:?}", input));
            }
            let value: f64 = rest[..num_len]
                .parse()
                .map_err(|_| format!("invalid duration {:?}", input))?;
            rest = &rest[num_len..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(rest.len());
            let nanos_per_unit = match &rest[..unit_len] {
                "ns" => 1e0,
                "us" | "µs" => 1e3,
                "ms" => 1e6,
                "s" => 1e9,
                "m" => 60e9,
                "h" => 3600e9,
                "" => return Err(format!("missing unit in duration {:?}", input)),
                unit => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
            };
            rest = &rest[unit_len..];
            total += value * nanos_per_unit;
        }

        Ok(Duration::from_nanos(total.round() as u64))
    }

    /// Format like Go's `Duration.String` for whole-millisecond values / 格式化时长
    pub fn format(d: Duration) -> String {
        if d.is_zero() {
            return "0s".to_string();
        }
        if d.as_secs() == 0 {
            return match d.subsec_nanos() {
                n if n % 1_000_000 == 0 => format!("{}ms", n / 1_000_000),
                n if n % 1_000 == 0 => format!("{}us", n / 1_000),
                n => format!("{}ns", n),
            };
        }

        let secs = d.as_secs();
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        let mut out = String::new();
        if h > 0 {
            out.push_str(&format!("{}h", h));
        }
        if h > 0 || m > 0 {
            out.push_str(&format!("{}m", m));
        }
        let millis = d.subsec_millis();
        if millis == 0 {
            out.push_str(&format!("{}s", s));
        } else {
            let frac = format!("{:03}", millis);
            out.push_str(&format!("{}.{}s", s, frac.trim_end_matches('0')));
        }
        out
    }
}
