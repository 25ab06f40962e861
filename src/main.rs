mod ast;
mod codegen;
mod driver;
mod error;
mod lexer;
mod parser;
mod registry;

use std::{fs, path::PathBuf};

use anyhow::{anyhow, Context as _};
use clap::{crate_version, App, Arg, ArgMatches};
use codegen::Codegen;
use driver::Driver;
use inkwell::context::Context;
use parser::Parser;

struct Options {
    input: PathBuf,
    optimize: bool,
    evaluate: bool,
    output: Option<PathBuf>,
}

impl Options {
    fn from_matches(matches: &ArgMatches) -> Self {
        Options {
            input: matches.value_of("INPUT").map(PathBuf::from).unwrap_or_default(),
            optimize: matches.is_present("optimize"),
            evaluate: matches.is_present("eval"),
            output: matches.value_of("output").map(PathBuf::from),
        }
    }
}

fn cli() -> App<'static, 'static> {
    App::new("toyc")
        .version(crate_version!())
        .about("compiles toy language source to LLVM IR")
        .arg(
            Arg::with_name("INPUT")
                .help("source file to compile")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("optimize")
                .short("O")
                .long("optimize")
                .help("run the function optimization passes"),
        )
        .arg(
            Arg::with_name("eval")
                .long("eval")
                .help("JIT-evaluate top-level expressions and print their values"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .value_name("FILE")
                .takes_value(true)
                .help("write the IR to FILE instead of stderr"),
        )
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let options = Options::from_matches(&cli().get_matches());

    // an unreadable file still produces an (empty) module
    let source = fs::read_to_string(&options.input).unwrap_or_else(|err| {
        log::error!("could not open {}: {}", options.input.display(), err);
        String::new()
    });

    let context = Context::create();
    let mut codegen = Codegen::new(&context);
    if options.optimize {
        codegen.enable_optimizations();
    }

    let summary = Driver::new(Parser::from_source(&source), &mut codegen)
        .evaluate(options.evaluate)
        .run();

    for value in &summary.values {
        println!("Evaluated to {}", value);
    }
    if !summary.is_success() {
        log::warn!("{} top-level units failed to compile", summary.errors.len());
    }

    match options.output {
        Some(path) => codegen
            .module
            .print_to_file(&path)
            .map_err(|e| anyhow!("{}", e.to_string_lossy()))
            .with_context(|| format!("failed to write IR to {}", path.display()))?,
        None => eprintln!("{}", codegen.print_ir()),
    }

    Ok(())
}
