use deckhand::{
    app::App,
    cli::{Command, RunOptions},
    config::loader::ConfigLoader,
    Result,
};

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match Command::parse(&args) {
        Ok(Command::ShowHelp) => {
            Command::print_help();
            Ok(())
        }
        Ok(Command::ShowVersion) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Ok(Command::Run(opts)) => {
            let app = App::from_options(*opts)?;
            app.run()
        }
        Ok(Command::Validate(opts)) => validate_config(&opts),
        Err(err) => {
            Command::print_help();
            Err(err)
        }
    }
}

fn validate_config(opts: &RunOptions) -> Result<()> {
    let mut loader = ConfigLoader::from_options(opts.config.as_deref())?;
    let config = loader.load()?;
    println!(
        "{} OK ({} pages, {} styles)",
        loader.path().display(),
        config.pages.len(),
        config.styles.len()
    );
    Ok(())
}
