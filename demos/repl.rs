use ircore::json::{parse_json, value_to_json};
use ircore::{Error, Evaluator, Value};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    // RUST_LOG=ircore=trace shows allocations, refcount changes and loop iterations
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("ircore - IR evaluator with a reference-counted heap");
    println!("Enter forms like: (defn sq (x) (* x x)) (sq 7)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let mut evaluator = Evaluator::new();
    let mut json_mode = false;

    loop {
        let prompt = if json_mode { "ir:json> " } else { "ir> " };
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                // Add the line to history
                let _ = rl.add_history_entry(line);

                // Handle special commands
                match line.split_whitespace().collect::<Vec<_>>().as_slice() {
                    [":help"] => {
                        print_help();
                        continue;
                    }
                    [":status"] => {
                        let status = evaluator.status();
                        println!(
                            "heap: {} slots, {} used, {} free",
                            status.capacity, status.used, status.free
                        );
                        continue;
                    }
                    [":env"] => {
                        print_definitions(&evaluator);
                        continue;
                    }
                    [":load", module, path] => {
                        match evaluator.load_module_from_file(module, path) {
                            Ok(_) => println!("Loaded module {module} from {path}"),
                            Err(e) => print_error(&e),
                        }
                        continue;
                    }
                    [":load", ..] => {
                        println!("Usage: :load <module> <path>");
                        continue;
                    }
                    [":json"] => {
                        json_mode = !json_mode;
                        if json_mode {
                            println!("JSON mode enabled:");
                            println!("  • Input is read as JSON arrays");
                            println!("  • Results shown as JSON");
                        } else {
                            println!("S-expression mode enabled:");
                            println!("  • Input is read as S-expressions");
                            println!("  • Results shown as S-expressions");
                        }
                        continue;
                    }
                    [":quit" | ":exit"] => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                let result = if json_mode {
                    parse_json(line).map_err(Error::from).and_then(|expr| {
                        println!("→ {expr}");
                        evaluator.eval(&expr)
                    })
                } else {
                    evaluator.eval_str_multi(line)
                };

                match result {
                    Ok(value) if json_mode => match value_to_json(&value) {
                        Ok(json) => println!("{json}"),
                        // Fallback to S-expression if conversion fails
                        Err(_) => println!("{value}"),
                    },
                    Ok(value) => println!("{value}"),
                    Err(e) => print_error(&e),
                }
            }

            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_error(error: &Error) {
    println!("Error [{}]: {error}", error.code());
}

fn print_help() {
    println!("IR evaluator commands:");
    println!("  :help                  - Show this help message");
    println!("  :status                - Show heap slot counts");
    println!("  :env                   - Show definitions in the default module");
    println!("  :load <module> <path>  - Evaluate a source file as a module");
    println!("  :json                  - Toggle JSON input and output");
    println!("  :quit                  - Exit the interpreter");
    println!("  Ctrl+C                 - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  const let namespace do if loop recur break defn defnr fn");
    println!();
    println!("Examples:");
    println!("  (+ 1 2)");
    println!("  (loop (i) (1) (if (< i 10) (recur (+ i 1)) (break i)))");
    println!("  (defn fib (i) (if (<= i 2) i (+ (fib (- i 1)) (fib (- i 2)))))");
    println!("  (do (let p (builtin.memory.create_struct 16 0)) (builtin.memory.inc_ref p))");
    println!("  [\"native.i64.mul\", 6, 7]   (in :json mode)");
    println!();
}

fn print_definitions(evaluator: &Evaluator) {
    let module = evaluator.default_namespace();
    let names = evaluator.globals().names_under(module.full_path());

    if names.is_empty() {
        println!("No definitions in {}.", module.full_path());
        return;
    }

    println!("Definitions in {} ({} total):", module.full_path(), names.len());
    for name in names {
        match evaluator.globals().get(name) {
            Ok(Value::Function(func)) => {
                println!("  {name} ({})", func.params.join(" "));
            }
            Ok(value) => println!("  {name} = {value}"),
            Err(_) => {}
        }
    }
}
