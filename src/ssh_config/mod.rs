//! OpenSSH client config: parsing, record building and in-place rewriting.

pub mod builder;
pub mod include;
pub mod parser;
pub mod pattern;
pub mod serializer;

pub use builder::{build_record, parse_forward_spec};
pub use include::{ConfigSource, load_config_sources};
pub use parser::{Block, BlockLine, Directive, HostBlock, MatchBlock, SshConfig};
pub use pattern::host_matches;
pub use serializer::{
    append_host_block, format_host_block, remove_host_block, replace_host_block,
};
