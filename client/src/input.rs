//! Console command parsing for the headless client

use shared::{PossessableId, Vec3};
use std::str::FromStr;

/// One line typed by the player
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Take(usize),
    Put,
    Use,
    Inspect,
    Recover,
    Select(PossessableId),
    AutoMove { id: PossessableId, target: Vec3 },
    Mirror(String),
    /// Moves the local hand anchor
    Move(Vec3),
    /// Adds a possessable to the first free slot
    Stash(PossessableId),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  take <slot>            pick up the item stored in a slot
  put                    put the held item back
  use                    use up the held item
  inspect | recover      freeze / unfreeze the held item
  select <id>            reserve a possessable
  automove <id> <x y z>  move a free possessable
  mirror <group>         send a copy of the held item through a mirror
  move <x y z>           move your hand
  stash <id>             add a possessable to your inventory
  status | help | quit";

fn parse_arg<T: FromStr>(arg: Option<&str>, what: &str) -> Result<T, String> {
    let raw = arg.ok_or_else(|| format!("missing {}", what))?;
    raw.parse()
        .map_err(|_| format!("'{}' is not a valid {}", raw, what))
}

fn parse_id(arg: Option<&str>) -> Result<PossessableId, String> {
    parse_arg::<u64>(arg, "possessable id").map(PossessableId)
}

fn parse_vec3<'a>(args: &mut impl Iterator<Item = &'a str>) -> Result<Vec3, String> {
    Ok(Vec3::new(
        parse_arg(args.next(), "x coordinate")?,
        parse_arg(args.next(), "y coordinate")?,
        parse_arg(args.next(), "z coordinate")?,
    ))
}

/// Parses a console line, accepting `#` in front of ids
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line
        .split_whitespace()
        .map(|word| word.trim_start_matches('#'));
    let Some(verb) = words.next() else {
        return Err("empty command".to_string());
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "take" | "t" => Command::Take(parse_arg(words.next(), "slot")?),
        "put" | "p" => Command::Put,
        "use" | "u" => Command::Use,
        "inspect" => Command::Inspect,
        "recover" => Command::Recover,
        "select" => Command::Select(parse_id(words.next())?),
        "automove" => Command::AutoMove {
            id: parse_id(words.next())?,
            target: parse_vec3(&mut words)?,
        },
        "mirror" => Command::Mirror(
            words
                .next()
                .ok_or_else(|| "missing mirror group".to_string())?
                .to_string(),
        ),
        "move" | "m" => Command::Move(parse_vec3(&mut words)?),
        "stash" => Command::Stash(parse_id(words.next())?),
        "status" | "s" => Command::Status,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => return Err(format!("unknown command '{}'", other)),
    };

    match words.next() {
        Some(extra) => Err(format!("unexpected argument '{}'", extra)),
        None => Ok(command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("take 2"), Ok(Command::Take(2)));
        assert_eq!(parse_command("  PUT "), Ok(Command::Put));
        assert_eq!(parse_command("q"), Ok(Command::Quit));
        assert_eq!(parse_command("mirror west"), Ok(Command::Mirror("west".into())));
    }

    #[test]
    fn test_ids_and_vectors() {
        assert_eq!(
            parse_command("select #101"),
            Ok(Command::Select(PossessableId(101)))
        );
        assert_eq!(
            parse_command("automove 3 1 0 -2.5"),
            Ok(Command::AutoMove {
                id: PossessableId(3),
                target: Vec3::new(1.0, 0.0, -2.5)
            })
        );
        assert_eq!(
            parse_command("move 0 1.5 0"),
            Ok(Command::Move(Vec3::new(0.0, 1.5, 0.0)))
        );
    }

    #[test]
    fn test_errors() {
        assert!(parse_command("").is_err());
        assert!(parse_command("take").is_err());
        assert!(parse_command("take one").is_err());
        assert!(parse_command("move 1 2").is_err());
        assert!(parse_command("put now").is_err());
        assert!(parse_command("dance").is_err());
    }
}
