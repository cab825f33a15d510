use clap::Args;

use super::super::{Ctx, print_json, print_line};
use crate::Result;
use crate::apps::{AppError, NameInfo, inspect_name};
use crate::core::{ErrorKind, InternalName, parse_name};

#[derive(Args, Debug)]
pub struct NameArgs {
    /// Printable or human name.
    pub name: String,

    /// Do not contact the directory; human names are hashed locally.
    #[arg(long)]
    pub offline: bool,
}

fn offline_info(raw: &str) -> std::result::Result<NameInfo, AppError> {
    let parsed = match parse_name(raw) {
        Ok(name) => Ok((name, None)),
        Err(err) if err.kind() == ErrorKind::BadNameSyntax => {
            InternalName::from_human(raw).map(|name| (name, Some(raw.to_string())))
        }
        Err(err) => Err(err),
    };
    let (name, human) = parsed.map_err(|e| AppError::usage(e.to_string()))?;
    Ok(NameInfo::new(&name, human))
}

pub(crate) fn handle(ctx: &Ctx, args: NameArgs) -> Result<()> {
    let info = if args.offline {
        offline_info(&args.name)?
    } else {
        let client = ctx.client()?;
        inspect_name(&client, &args.name)?
    };

    if ctx.json {
        print_json(&info)?;
    } else {
        print_line(&format!("printable: {}", info.printable))?;
        print_line(&format!("hex:       {}", info.hex))?;
        print_line(&format!(
            "human:     {}",
            info.human.as_deref().unwrap_or("(none)")
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_accepts_both_forms() {
        let human = offline_info("edu.example.sensor").expect("human");
        assert_eq!(human.human.as_deref(), Some("edu.example.sensor"));

        let printable = offline_info(&human.printable).expect("printable");
        assert_eq!(printable.hex, human.hex);
        assert_eq!(printable.human, None);
    }

    #[test]
    fn offline_rejects_whitespace() {
        let err = offline_info("not a name").expect_err("invalid");
        assert_eq!(err.exit_code(), 64);
    }
}
