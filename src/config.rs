//! Configuration parsing for the resolver
//!
//! The file is a list of directives, one per line, each with arguments and an
//! optional `{ }` block of sub-directives:
//!
//! ```text
//! dns 0.0.0.0:53
//! api 0.0.0.0:8081
//! forward 1.1.1.1:53 8.8.8.8 {
//!     timeout 1s
//! }
//! cache redis://127.0.0.1:6379/
//! store dns.db
//! ```

use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub block: Vec<Directive>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis(String),
}

impl CacheBackend {
    pub fn parse(s: &str) -> Result<Self> {
        if s == "memory" {
            Ok(CacheBackend::Memory)
        } else if s.starts_with("redis://") || s.starts_with("rediss://") {
            Ok(CacheBackend::Redis(s.to_string()))
        } else {
            anyhow::bail!("unsupported cache backend '{}' (expected 'memory' or a redis:// URL)", s)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardConfig {
    pub upstreams: Vec<SocketAddr>,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    pub dir: String,
    pub keep: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub dns_addr: SocketAddr,
    pub api_addr: SocketAddr,
    pub forward: ForwardConfig,
    pub cache: CacheBackend,
    pub store_path: String,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dns_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            forward: ForwardConfig {
                upstreams: vec![SocketAddr::from(([1, 1, 1, 1], 53))],
                timeout: Duration::from_secs(1),
            },
            cache: CacheBackend::Memory,
            store_path: "dns.db".to_string(),
            log: LogConfig { dir: "logs".to_string(), keep: 30 },
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token { Text(String), OpenBrace, CloseBrace, Newline }

impl Config {
    /// Load configuration from a file path
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let tokens = Self::lex(content);
        let (directives, _) = Self::parse_block(&tokens, 0)?;
        let mut config = Config::default();

        for d in &directives {
            match d.name.as_str() {
                "dns" => config.dns_addr = parse_addr(single_arg(d)?, 53)?,
                "api" => config.api_addr = parse_addr(single_arg(d)?, 8081)?,
                "forward" => {
                    if d.args.is_empty() {
                        anyhow::bail!("forward needs at least one upstream");
                    }
                    config.forward.upstreams = d
                        .args
                        .iter()
                        .map(|a| parse_addr(a, 53))
                        .collect::<Result<Vec<_>>>()?;
                    for sub in &d.block {
                        match sub.name.as_str() {
                            "timeout" => config.forward.timeout = parse_duration(single_arg(sub)?)?,
                            other => anyhow::bail!("unknown forward option '{}'", other),
                        }
                    }
                }
                "cache" => config.cache = CacheBackend::parse(single_arg(d)?)?,
                "store" => config.store_path = single_arg(d)?.to_string(),
                "log" => {
                    for sub in &d.block {
                        match sub.name.as_str() {
                            "dir" => config.log.dir = single_arg(sub)?.to_string(),
                            "keep" => config.log.keep = single_arg(sub)?.parse()?,
                            other => anyhow::bail!("unknown log option '{}'", other),
                        }
                    }
                }
                other => anyhow::bail!("Unknown directive: {}", other),
            }
        }
        Ok(config)
    }

    fn lex(input: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut chars = input.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c == '\n' { tokens.push(Token::Newline); chars.next(); }
            else if c.is_whitespace() { chars.next(); }
            else if c == '#' { while let Some(&c) = chars.peek() { if c == '\n' { break; } chars.next(); } }
            else if c == '{' { tokens.push(Token::OpenBrace); chars.next(); }
            else if c == '}' { tokens.push(Token::CloseBrace); chars.next(); }
            else if c == '"' {
                chars.next();
                let mut s = String::new();
                while let Some(&c) = chars.peek() { if c == '"' { chars.next(); break; } s.push(c); chars.next(); }
                tokens.push(Token::Text(s));
            } else {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '#' || c == '{' || c == '}' || c == '"' { break; }
                    s.push(c); chars.next();
                }
                tokens.push(Token::Text(s));
            }
        }
        tokens
    }

    /// Parse a directive block starting at position i
    fn parse_block(tokens: &[Token], mut i: usize) -> Result<(Vec<Directive>, usize)> {
        let mut directives = Vec::new();
        while i < tokens.len() {
            match &tokens[i] {
                Token::Newline => { i += 1; }
                Token::CloseBrace => { i += 1; return Ok((directives, i)); }
                Token::Text(name) => {
                    let name = name.clone(); i += 1;
                    let mut args = Vec::new();
                    let mut block = Vec::new();
                    while i < tokens.len() {
                        match &tokens[i] {
                            Token::Text(arg) => { args.push(arg.clone()); i += 1; }
                            Token::OpenBrace => {
                                i += 1;
                                let (sub_block, next_i) = Self::parse_block(tokens, i)?;
                                block = sub_block; i = next_i; break;
                            }
                            Token::Newline | Token::CloseBrace => { break; }
                        }
                    }
                    directives.push(Directive { name, args, block });
                }
                Token::OpenBrace => anyhow::bail!("unexpected '{{' without a directive"),
            }
        }
        Ok((directives, i))
    }
}

fn single_arg(d: &Directive) -> Result<&str> {
    match d.args.as_slice() {
        [arg] => Ok(arg.as_str()),
        _ => anyhow::bail!("'{}' expects exactly one argument, got {}", d.name, d.args.len()),
    }
}

/// Parses `ip:port`, `[v6]:port` or a bare IP using `default_port`.
pub fn parse_addr(s: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: std::net::IpAddr = s
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid address '{}'", s))?;
    Ok(SocketAddr::new(ip, default_port))
}

pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") { Ok(Duration::from_millis(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('s') { Ok(Duration::from_secs(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('m') { Ok(Duration::from_secs(stripped.parse::<u64>()? * 60)) }
    else if let Some(stripped) = s.strip_suffix('h') { Ok(Duration::from_secs(stripped.parse::<u64>()? * 3600)) }
    else { anyhow::bail!("invalid duration '{}'", s) }
}
