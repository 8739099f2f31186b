use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::Result;
use embassy_futures::block_on;
use sdfat::fat::{self, DirCursor, FatError};

use crate::fsops::{build_filter, mount};
use crate::image::{ImageDisk, StdoutConsole};
use crate::oplog::{Op, OpLog};

/// Interactive loop over a mounted image: cd, ls, cat, pwd, exit.
pub fn run(image: &Path, oplog: &mut OpLog) -> Result<()> {
    let mut disk = ImageDisk::open(image)?;
    let vol = mount(&mut disk)?;
    let mut cursor = DirCursor::root(&vol);
    let mut console = StdoutConsole;

    println!("mounted {} — type 'help' for commands", image.display());
    let stdin = io::stdin();
    loop {
        print!("{}{}> ", cursor.long_parent_path, cursor.long_name);
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        // Names may contain spaces; everything after the command is the
        // argument.
        let argument = line.trim_start()[command.len()..].trim();

        match command {
            "exit" | "quit" => break,
            "help" => {
                println!("commands: cd <dir> | ls [--all|--created|--accessed|--modified|--short] | cat <file> | pwd | exit");
            }
            "pwd" => {
                println!("{}{}", cursor.long_parent_path, cursor.long_name);
            }
            "cd" => {
                match block_on(fat::change_dir(&mut disk, &vol, &mut cursor, argument)) {
                    Ok(()) => oplog.record(Op::ShellCommand {
                        image,
                        command: "cd",
                        argument,
                    }),
                    Err(FatError::EndOfDirectory) => {
                        println!("no such directory: {}", argument)
                    }
                    Err(err) => println!("cd failed: {}", err),
                }
            }
            "ls" => {
                let mut all = false;
                let mut created = false;
                let mut accessed = false;
                let mut modified = false;
                let mut short = false;
                for flag in argument.split_whitespace() {
                    match flag {
                        "--all" => all = true,
                        "--created" => created = true,
                        "--accessed" => accessed = true,
                        "--modified" => modified = true,
                        "--short" => short = true,
                        other => println!("ignoring unknown flag: {}", other),
                    }
                }
                let filter = build_filter(all, created, accessed, modified, short);
                match block_on(fat::list_dir(&mut disk, &vol, &cursor, filter, &mut console)) {
                    Ok(()) => oplog.record(Op::ShellCommand {
                        image,
                        command: "ls",
                        argument,
                    }),
                    Err(err) => println!("ls failed: {}", err),
                }
            }
            "cat" => {
                match block_on(fat::print_file(&mut disk, &vol, &cursor, argument, &mut console)) {
                    Ok(()) => oplog.record(Op::ShellCommand {
                        image,
                        command: "cat",
                        argument,
                    }),
                    Err(FatError::EndOfDirectory) => println!("no such file: {}", argument),
                    Err(err) => println!("cat failed: {}", err),
                }
            }
            other => println!("unknown command: {} (try 'help')", other),
        }
    }
    Ok(())
}
