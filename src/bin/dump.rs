use std::env;
use std::io::Write;
use std::process;
use std::sync::Arc;

use tabletdb::Tablet;

fn main() {
    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "dump".to_string());
    let path = match args.next() {
        Some(path) => path,
        None => {
            eprintln!("Usage: {program} <tablet>");
            process::exit(2);
        }
    };

    let tablet = match Tablet::open(&path) {
        Ok(tablet) => Arc::new(tablet),
        Err(e) => {
            eprintln!("{path}: {e}");
            process::exit(1);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for pair in tablet.iterator() {
        match pair {
            Ok((key, value)) => {
                if write_pair(&mut out, &key, &value).is_err() {
                    process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("{path}: {e}");
                process::exit(1);
            }
        }
    }
}

fn write_pair(out: &mut impl Write, key: &[u8], value: &[u8]) -> std::io::Result<()> {
    out.write_all(key)?;
    out.write_all(b": ")?;
    out.write_all(value)?;
    out.write_all(b"\n")
}
