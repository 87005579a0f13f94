/// PyTron - Python Bytecode Translator CLI
use pytron::config::Config;
use pytron::runtime::Value;
use pytron::source::{ClassRecord, DialectVersion, FunctionRecord};
use pytron::translator::{Artifact, ArtifactSet, FunctionArtifact, Translator};
use pytron::vm::BytecodeVM;
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("PyTron v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    pytron [OPTIONS] <RECORD> [--run <ARGS>...]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help             Print this help message");
    eprintln!("    -v, --version          Print version information");
    eprintln!("    -d, --dialect <X.Y>    Source dialect when the record names none (default: 3.11)");
    eprintln!("    -c, --config <FILE>    Read settings from FILE instead of ./pytron.toml");
    eprintln!("    -q, --quiet            Do not print the disassembly");
    eprintln!("    --run <ARGS>...        Call the translated function with integer arguments");
    eprintln!();
    eprintln!("ARGUMENTS:");
    eprintln!("    <RECORD>               Function or class record in TOML (use '-' for stdin)");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    PYTRON_LOG             Log filter, e.g. 'pytron::translate=debug'");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    pytron add.toml");
    eprintln!("    pytron add.toml --run 2 40");
    eprintln!("    PYTRON_LOG=pytron::dataflow=trace pytron -d 3.9 loop.toml");
}

fn print_version() {
    println!("PyTron {}", VERSION);
}

struct Options {
    input: Option<String>,
    dialect: Option<DialectVersion>,
    config: Option<String>,
    quiet: bool,
    run_args: Option<Vec<i64>>,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut input = None;
    let mut dialect = None;
    let mut config = None;
    let mut quiet = false;
    let mut run_args = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                process::exit(0);
            }
            "-d" | "--dialect" => {
                i += 1;
                let value = args.get(i).ok_or("Missing version after --dialect")?;
                let version: DialectVersion = value.parse().map_err(|e| format!("{}", e))?;
                dialect = Some(version);
            }
            "-c" | "--config" => {
                i += 1;
                config = Some(args.get(i).ok_or("Missing file after --config")?.clone());
            }
            "-q" | "--quiet" => {
                quiet = true;
            }
            "--run" => {
                let rest = &args[i + 1..];
                let ints = rest
                    .iter()
                    .map(|a| a.parse::<i64>().map_err(|_| format!("--run arguments must be integers, got '{}'", a)))
                    .collect::<Result<Vec<_>, _>>()?;
                run_args = Some(ints);
                break;
            }
            arg if arg.starts_with('-') && arg != "-" => {
                return Err(format!("Unknown option: {}", arg));
            }
            arg => {
                if input.is_some() {
                    return Err("Multiple input files specified".to_string());
                }
                input = Some(arg.to_string());
            }
        }
        i += 1;
    }

    Ok(Options { input, dialect, config, quiet, run_args })
}

fn read_input(input: &str) -> Result<String, String> {
    if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| format!("Failed to read from stdin: {}", e))?;
        Ok(buffer)
    } else {
        let path = Path::new(input);
        if !path.exists() {
            return Err(format!("Input file not found: {}", input));
        }
        fs::read_to_string(path).map_err(|e| format!("Failed to read file '{}': {}", input, e))
    }
}

fn load_config(options: &Options) -> Result<Config, String> {
    let config = match &options.config {
        Some(path) => Config::load(Path::new(path)),
        None => Config::discover(),
    };
    config.map_err(|e| e.to_string())
}

/// A record file holds either a function (`name = ...`) or a class (`qualified_name = ...` with methods)
enum Record {
    Function(FunctionRecord),
    Class(ClassRecord),
}

fn parse_record(text: &str) -> Result<Record, String> {
    match FunctionRecord::from_toml_str(text) {
        Ok(record) => Ok(Record::Function(record)),
        Err(function_error) => match ClassRecord::from_toml_str(text) {
            Ok(record) => Ok(Record::Class(record)),
            Err(_) => Err(format!("Not a function or class record: {}", function_error)),
        },
    }
}

fn disassemble(set: &ArtifactSet) -> String {
    let mut output = String::new();
    for artifact in &set.artifacts {
        match artifact {
            Artifact::Function(function) => output.push_str(&function.chunk.disassemble()),
            Artifact::Class(class) => {
                output.push_str(&format!("== class {} ({}) ==\n", class.qualified_name, class.name));
                for method in &class.methods {
                    output.push_str(&method.function.chunk.disassemble());
                }
            }
            Artifact::Proxy(proxy) => {
                for (_, chunk) in &proxy.methods {
                    output.push_str(&chunk.disassemble());
                }
            }
        }
    }
    output
}

fn run_function(translator: &Translator, config: &Config, function: &FunctionArtifact, args: &[i64]) -> Result<String, String> {
    let mut vm = BytecodeVM::with_config(translator.registry().clone(), config.vm.clone());
    let args = args.iter().copied().map(Value::Int).collect();
    let result = vm.call_function(function, args).map_err(|e| format!("Execution error: {}", e))?;
    Ok(result.repr())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("PYTRON_LOG"))
        .with_writer(io::stderr)
        .init();

    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    let Some(input) = options.input.as_deref() else {
        eprintln!("Error: Missing input file");
        eprintln!();
        print_usage();
        process::exit(1);
    };

    let config = match load_config(&options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let record = match read_input(input).and_then(|text| parse_record(&text)) {
        Ok(record) => record,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let translator = Translator::new(config.translator.clone());
    let translated = match &record {
        Record::Function(function) => {
            let version = function.version.or(options.dialect).unwrap_or(DialectVersion::V3_11);
            translator.translate(function, version).map(|artifact| {
                let mut set = ArtifactSet::new();
                set.push_function(Arc::new(artifact));
                set
            })
        }
        Record::Class(class) => {
            let mut class = class.clone();
            if class.version.is_none() {
                class.version = options.dialect;
            }
            translator.translate_class(&class)
        }
    };
    let set = match translated {
        Ok(set) => set,
        Err(e) => {
            eprintln!("Translation error: {}", e);
            process::exit(1);
        }
    };

    if !options.quiet {
        print!("{}", disassemble(&set));
    }

    if let Some(args) = &options.run_args {
        let function = set.artifacts.iter().find_map(|a| match a {
            Artifact::Function(f) => Some(f.clone()),
            _ => None,
        });
        let Some(function) = function else {
            eprintln!("Error: --run needs a function record");
            process::exit(1);
        };
        match run_function(&translator, &config, &function, args) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
    }
}
