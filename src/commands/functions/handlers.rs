//! FUNCTION subcommand handlers

use bytes::Bytes;

use super::loader;
use super::registry::{Library, Registry, ENGINE};
use super::snapshot::{self, RestorePolicy};
use crate::error::{FerriteError, Result};
use crate::protocol::Frame;

/// Dispatch `FUNCTION <subcommand> [args...]`; `args` starts at the
/// subcommand.
pub fn function_command(registry: &mut Registry, args: &[Bytes]) -> Result<Frame> {
    let (subcommand, rest) = match args.split_first() {
        Some(split) => split,
        None => return Err(FerriteError::WrongArity("function".to_string())),
    };
    let subcommand = String::from_utf8_lossy(subcommand).to_uppercase();

    match subcommand.as_str() {
        "LOAD" => function_load(registry, rest),
        "DELETE" => function_delete(registry, rest),
        "FLUSH" => function_flush(registry, rest),
        "LIST" => function_list(registry, rest),
        "DUMP" => function_dump(registry, rest),
        "RESTORE" => function_restore(registry, rest),
        "KILL" => no_args("kill", rest).and(Err(FerriteError::NoFunctionRunning)),
        "STATS" => function_stats(registry, rest),
        "HELP" => no_args("help", rest).map(|_| function_help()),
        _ => Err(FerriteError::UnknownSubcommand(subcommand.to_lowercase())),
    }
}

fn no_args(name: &str, args: &[Bytes]) -> Result<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(FerriteError::WrongArity(format!("function|{name}")))
    }
}

fn utf8(arg: &Bytes) -> Result<&str> {
    std::str::from_utf8(arg).map_err(|_| FerriteError::InvalidHeader("library code must be valid UTF-8".to_string()))
}

/// FUNCTION LOAD [REPLACE] <library-code>
fn function_load(registry: &mut Registry, args: &[Bytes]) -> Result<Frame> {
    let (replace, payload) = match args {
        [payload] => (false, payload),
        [flag, payload] if flag.eq_ignore_ascii_case(b"REPLACE") => (true, payload),
        [flag, _] => {
            return Err(FerriteError::UnknownArgument(
                String::from_utf8_lossy(flag).into_owned(),
            ))
        }
        _ => return Err(FerriteError::WrongArity("function|load".to_string())),
    };

    let name = loader::load(registry, utf8(payload)?, replace)?;
    Ok(Frame::bulk(name))
}

/// FUNCTION DELETE <library-name>
fn function_delete(registry: &mut Registry, args: &[Bytes]) -> Result<Frame> {
    let [name] = args else {
        return Err(FerriteError::WrongArity("function|delete".to_string()));
    };
    registry.remove(&String::from_utf8_lossy(name))?;
    Ok(Frame::ok())
}

/// FUNCTION FLUSH [ASYNC|SYNC]
fn function_flush(registry: &mut Registry, args: &[Bytes]) -> Result<Frame> {
    match args {
        [] => {}
        [mode] if mode.eq_ignore_ascii_case(b"ASYNC") || mode.eq_ignore_ascii_case(b"SYNC") => {}
        [mode] => {
            return Err(FerriteError::UnknownArgument(
                String::from_utf8_lossy(mode).into_owned(),
            ))
        }
        _ => return Err(FerriteError::WrongArity("function|flush".to_string())),
    }

    let count = registry.clear();
    tracing::info!(libraries = count, "Function libraries flushed");
    Ok(Frame::ok())
}

/// FUNCTION LIST [LIBRARYNAME <name>] [WITHCODE]
fn function_list(registry: &Registry, args: &[Bytes]) -> Result<Frame> {
    let mut filter: Option<String> = None;
    let mut with_code = false;

    let mut i = 0;
    while i < args.len() {
        let arg = String::from_utf8_lossy(&args[i]).to_uppercase();
        match arg.as_str() {
            "WITHCODE" if !with_code => {
                with_code = true;
                i += 1;
            }
            "LIBRARYNAME" if filter.is_none() => {
                let name = args.get(i + 1).ok_or(FerriteError::Syntax)?;
                filter = Some(String::from_utf8_lossy(name).into_owned());
                i += 2;
            }
            "WITHCODE" | "LIBRARYNAME" => return Err(FerriteError::Syntax),
            _ => {
                return Err(FerriteError::UnknownArgument(
                    String::from_utf8_lossy(&args[i]).into_owned(),
                ))
            }
        }
    }

    let libraries = registry
        .list(filter.as_deref())
        .map(|library| library_record(library, with_code))
        .collect();
    Ok(Frame::array(libraries))
}

fn library_record(library: &Library, with_code: bool) -> Frame {
    let functions = library
        .functions
        .values()
        .map(|function| {
            Frame::array(vec![
                Frame::bulk("name"),
                Frame::bulk(function.name.clone()),
                Frame::bulk("description"),
                match &function.description {
                    Some(description) => Frame::bulk(description.clone()),
                    None => Frame::null(),
                },
                Frame::bulk("flags"),
                Frame::array(function.flags.iter().map(|f| Frame::bulk(f.as_str())).collect()),
            ])
        })
        .collect();

    let mut record = vec![
        Frame::bulk("library_name"),
        Frame::bulk(library.name.clone()),
        Frame::bulk("engine"),
        Frame::bulk(ENGINE),
        Frame::bulk("functions"),
        Frame::array(functions),
    ];
    if with_code {
        record.push(Frame::bulk("library_code"));
        record.push(Frame::bulk(library.code.clone()));
    }
    Frame::array(record)
}

/// FUNCTION DUMP
fn function_dump(registry: &Registry, args: &[Bytes]) -> Result<Frame> {
    no_args("dump", args)?;
    Ok(Frame::bulk(snapshot::dump(registry)?))
}

/// FUNCTION RESTORE <payload> [FLUSH|APPEND|REPLACE]
fn function_restore(registry: &mut Registry, args: &[Bytes]) -> Result<Frame> {
    let (payload, policy) = match args {
        [payload] => (payload, RestorePolicy::default()),
        [payload, policy] => {
            let policy_name = String::from_utf8_lossy(policy);
            let policy = RestorePolicy::parse(&policy_name)
                .ok_or_else(|| FerriteError::UnknownArgument(policy_name.into_owned()))?;
            (payload, policy)
        }
        _ => return Err(FerriteError::WrongArity("function|restore".to_string())),
    };

    snapshot::restore(registry, payload, policy)?;
    Ok(Frame::ok())
}

/// FUNCTION STATS
fn function_stats(registry: &Registry, args: &[Bytes]) -> Result<Frame> {
    no_args("stats", args)?;
    Ok(Frame::array(vec![
        Frame::bulk("running_script"),
        Frame::null(),
        Frame::bulk("engines"),
        Frame::array(vec![Frame::array(vec![
            Frame::bulk("name"),
            Frame::bulk(ENGINE),
            Frame::bulk("libraries_count"),
            Frame::Integer(registry.len() as i64),
            Frame::bulk("functions_count"),
            Frame::Integer(registry.function_count() as i64),
        ])]),
    ]))
}

fn function_help() -> Frame {
    Frame::array(
        [
            "FUNCTION <subcommand> [<arg> [value] [opt] ...]. Subcommands are:",
            "LOAD [REPLACE] <FUNCTION CODE>",
            "    Create a new library with the given library name and code.",
            "DELETE <LIBRARY NAME>",
            "    Delete the given library.",
            "LIST [LIBRARYNAME PATTERN] [WITHCODE]",
            "    Return general information on all the libraries.",
            "FLUSH [ASYNC|SYNC]",
            "    Delete all the libraries.",
            "DUMP",
            "    Return a serialized payload representing the current libraries.",
            "RESTORE <PAYLOAD> [FLUSH|APPEND|REPLACE]",
            "    Restore the libraries represented by the given payload.",
            "STATS",
            "    Return information about the function engine.",
            "KILL",
            "    Kill the currently executing function.",
            "HELP",
            "    Print this help.",
        ]
        .into_iter()
        .map(Frame::bulk)
        .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = "#!lua name=mylib\n\
        redis.register_function('f', function() return 1 end)\n\
        redis.register_function{function_name='g', callback=function() return 2 end, flags={'no-writes'}, description='reader'}";

    fn run(registry: &mut Registry, parts: &[&str]) -> Result<Frame> {
        let args: Vec<Bytes> = parts.iter().map(|p| Bytes::from(p.to_string())).collect();
        function_command(registry, &args)
    }

    #[test]
    fn test_load_and_delete() {
        let mut registry = Registry::default();
        assert_eq!(run(&mut registry, &["LOAD", LIB]).unwrap(), Frame::bulk("mylib"));
        assert_eq!(
            run(&mut registry, &["load", LIB]).unwrap_err(),
            FerriteError::DuplicateLibrary("mylib".to_string())
        );
        assert_eq!(run(&mut registry, &["LOAD", "replace", LIB]).unwrap(), Frame::bulk("mylib"));
        assert!(matches!(
            run(&mut registry, &["LOAD", "FORCE", LIB]).unwrap_err(),
            FerriteError::UnknownArgument(_)
        ));

        assert_eq!(run(&mut registry, &["DELETE", "mylib"]).unwrap(), Frame::ok());
        assert_eq!(
            run(&mut registry, &["DELETE", "mylib"]).unwrap_err(),
            FerriteError::LibraryNotFound("mylib".to_string())
        );
    }

    #[test]
    fn test_list_shapes() {
        let mut registry = Registry::default();
        assert_eq!(run(&mut registry, &["LIST"]).unwrap(), Frame::array(vec![]));

        run(&mut registry, &["LOAD", LIB]).unwrap();
        let listed = run(&mut registry, &["LIST"]).unwrap();
        let libraries = listed.as_array().unwrap();
        assert_eq!(libraries.len(), 1);

        let record = libraries[0].as_array().unwrap();
        assert_eq!(record[1], Frame::bulk("mylib"));
        assert_eq!(record[3], Frame::bulk("LUA"));
        assert_eq!(record.len(), 6);

        let functions = record[5].as_array().unwrap();
        let g = functions[1].as_array().unwrap();
        assert_eq!(g[1], Frame::bulk("g"));
        assert_eq!(g[3], Frame::bulk("reader"));
        assert_eq!(g[5], Frame::array(vec![Frame::bulk("no-writes")]));

        let with_code = run(&mut registry, &["LIST", "WITHCODE"]).unwrap();
        let record = with_code.as_array().unwrap()[0].as_array().unwrap().clone();
        assert_eq!(record[6], Frame::bulk("library_code"));
        let (_, body) = LIB.split_once('\n').unwrap();
        assert_eq!(record[7], Frame::bulk(body.to_string()));
        assert!(!record[7].as_str().unwrap().starts_with("#!lua"));

        assert_eq!(
            run(&mut registry, &["LIST", "LIBRARYNAME", "nope"]).unwrap(),
            Frame::array(vec![])
        );
        assert_eq!(
            run(&mut registry, &["LIST", "LIBRARYNAME", "mylib"])
                .unwrap()
                .as_array()
                .map(Vec::len),
            Some(1)
        );
        assert!(matches!(
            run(&mut registry, &["LIST", "BOGUS"]).unwrap_err(),
            FerriteError::UnknownArgument(_)
        ));
        assert_eq!(
            run(&mut registry, &["LIST", "LIBRARYNAME"]).unwrap_err(),
            FerriteError::Syntax
        );
    }

    #[test]
    fn test_flush() {
        let mut registry = Registry::default();
        run(&mut registry, &["LOAD", LIB]).unwrap();
        assert_eq!(run(&mut registry, &["FLUSH", "async"]).unwrap(), Frame::ok());
        assert!(registry.is_empty());
        assert_eq!(run(&mut registry, &["FLUSH"]).unwrap(), Frame::ok());
        assert!(matches!(
            run(&mut registry, &["FLUSH", "LATER"]).unwrap_err(),
            FerriteError::UnknownArgument(_)
        ));
    }

    #[test]
    fn test_dump_restore() {
        let mut registry = Registry::default();
        run(&mut registry, &["LOAD", LIB]).unwrap();
        let dumped = run(&mut registry, &["DUMP"]).unwrap();
        let payload = dumped.as_str().unwrap().to_string();

        run(&mut registry, &["FLUSH"]).unwrap();
        assert_eq!(run(&mut registry, &["RESTORE", &payload]).unwrap(), Frame::ok());
        assert!(registry.lookup_function("g").is_ok());

        assert!(matches!(
            run(&mut registry, &["RESTORE", &payload, "MERGE"]).unwrap_err(),
            FerriteError::UnknownArgument(_)
        ));
        assert!(matches!(
            run(&mut registry, &["RESTORE", "garbage"]).unwrap_err(),
            FerriteError::InvalidPayload(_)
        ));
    }

    #[test]
    fn test_stats_and_kill() {
        let mut registry = Registry::default();
        run(&mut registry, &["LOAD", LIB]).unwrap();
        assert_eq!(
            run(&mut registry, &["STATS"]).unwrap(),
            Frame::array(vec![
                Frame::bulk("running_script"),
                Frame::null(),
                Frame::bulk("engines"),
                Frame::array(vec![Frame::array(vec![
                    Frame::bulk("name"),
                    Frame::bulk("LUA"),
                    Frame::bulk("libraries_count"),
                    Frame::Integer(1),
                    Frame::bulk("functions_count"),
                    Frame::Integer(2),
                ])]),
            ])
        );
        assert_eq!(
            run(&mut registry, &["KILL"]).unwrap_err(),
            FerriteError::NoFunctionRunning
        );
    }

    #[test]
    fn test_unknown_subcommand_and_help() {
        let mut registry = Registry::default();
        assert_eq!(
            run(&mut registry, &["FROB"]).unwrap_err(),
            FerriteError::UnknownSubcommand("frob".to_string())
        );
        assert_eq!(
            run(&mut registry, &[]).unwrap_err(),
            FerriteError::WrongArity("function".to_string())
        );
        assert!(run(&mut registry, &["HELP"]).unwrap().as_array().is_some());
    }
}
