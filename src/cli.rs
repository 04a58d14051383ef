use crate::{Error, Result};

/// Options for the `run` and `validate` commands; values are `None` when not
/// provided on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub config: Option<String>,
    pub brightness: Option<u8>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
}

/// Parsed command-line intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(Box<RunOptions>),
    Validate(RunOptions),
    ShowHelp,
    ShowVersion,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        if args.is_empty() {
            return Ok(Command::Run(Box::default()));
        }

        let mut iter = args.iter();
        match iter.next().map(|s| s.as_str()) {
            Some("run") => Ok(Command::Run(Box::new(parse_run_options(&mut iter)?))),
            Some("validate") => Ok(Command::Validate(parse_run_options(&mut iter)?)),
            Some("--help") | Some("-h") => Ok(Command::ShowHelp),
            Some("--version") | Some("-V") => Ok(Command::ShowVersion),
            Some(flag) if flag.starts_with('-') => {
                // Allow omitting the explicit `run` subcommand: pass the consumed
                // flag plus the remaining args into the run parser.
                let mut flags: Vec<String> = Vec::with_capacity(args.len());
                flags.push(flag.to_string());
                flags.extend(iter.map(|s| s.to_string()));
                let mut iter = flags.iter();
                Ok(Command::Run(Box::new(parse_run_options(&mut iter)?)))
            }
            Some(cmd) => Err(Error::InvalidArgs(format!(
                "unknown command '{cmd}', try --help"
            ))),
            None => Ok(Command::Run(Box::default())),
        }
    }

    pub fn help() -> &'static str {
        concat!(
            "deckhand - USB button-panel daemon\n",
            "\n",
            "USAGE:\n",
            "  deckhand run [--config <path>] [--brightness <0-100>] [--log-level <level>] [--log-file <path>]\n",
            "  deckhand validate [--config <path>]\n",
            "  deckhand --help\n",
            "  deckhand --version\n",
            "\n",
            "OPTIONS:\n",
            "  --config <path>       Page configuration file (default: ~/.deckhand/config.yaml)\n",
            "  --brightness <0-100>  Override the configured panel brightness\n",
            "  --log-level <level>   error, warn, info, debug or trace (default: info)\n",
            "  --log-file <path>     Append log output to a file as well as stderr\n",
            "  -h, --help            Show this help\n",
            "  -V, --version         Show version\n",
        )
    }

    pub fn print_help() {
        println!("{}", Self::help());
    }
}

fn parse_run_options(iter: &mut std::slice::Iter<String>) -> Result<RunOptions> {
    let mut opts = RunOptions::default();

    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--config" => {
                opts.config = Some(take_value(flag, iter)?);
            }
            "--brightness" => {
                let raw = take_value(flag, iter)?;
                let value: u8 = raw.parse().map_err(|_| {
                    Error::InvalidArgs("brightness must be an integer 0-100".to_string())
                })?;
                if value > 100 {
                    return Err(Error::InvalidArgs(
                        "brightness must be an integer 0-100".to_string(),
                    ));
                }
                opts.brightness = Some(value);
            }
            "--log-level" => {
                opts.log_level = Some(take_value(flag, iter)?);
            }
            "--log-file" => {
                opts.log_file = Some(take_value(flag, iter)?);
            }
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown flag '{other}', try --help"
                )));
            }
        }
    }

    Ok(opts)
}

fn take_value(flag: &str, iter: &mut std::slice::Iter<String>) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| Error::InvalidArgs(format!("expected a value after {flag}")))
}
