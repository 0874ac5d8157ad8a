//! Trace file loading. Each core reads `{base}_{id}.data`, one instruction
//! per line: `0 <hex addr>` load, `1 <hex addr>` store, `2 <cycles>`
//! compute. Trailing whitespace is ignored; blank lines are an error.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;

use crate::commons::{Addr, Instr, Instructions, NUM_CORES};

pub fn load_traces(base: &str) -> Result<Vec<Instructions>> {
    (0..NUM_CORES)
        .map(|id| {
            let path = format!("{base}_{id}.data");
            parse_file(Path::new(&path))
        })
        .collect()
}

pub fn parse_file(path: &Path) -> Result<Instructions> {
    let file =
        File::open(path).with_context(|| format!("cannot open trace file {}", path.display()))?;
    info!("reading trace {}", path.display());
    let mut instructions = Instructions::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("{}:{}: read failed", path.display(), idx + 1))?;
        let instr = parse_line(line.trim_end())
            .with_context(|| format!("{}:{}", path.display(), idx + 1))?;
        instructions.push_back(instr);
    }
    Ok(instructions)
}

fn parse_line(line: &str) -> Result<Instr> {
    let mut parts = line.split_whitespace();
    let op = parts.next().context("blank line")?;
    let operand = parts.next().context("missing operand")?;
    if parts.next().is_some() {
        bail!("trailing tokens after operand");
    }
    match op {
        "0" => Ok(Instr::Load(parse_addr(operand)?)),
        "1" => Ok(Instr::Store(parse_addr(operand)?)),
        "2" => Ok(Instr::Other(parse_cycles(operand)?)),
        _ => bail!("invalid operation '{op}'"),
    }
}

fn parse_addr(token: &str) -> Result<Addr> {
    let hex = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    let value = u32::from_str_radix(hex, 16)
        .with_context(|| format!("invalid address literal '{token}'"))?;
    Ok(Addr(value))
}

fn parse_cycles(token: &str) -> Result<u32> {
    let value = if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else {
        token.parse()
    };
    value.with_context(|| format!("invalid cycle count '{token}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse_str(content: &str) -> Result<Instructions> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        parse_file(file.path())
    }

    #[test]
    fn parses_all_three_operations() {
        let instrs = parse_str("0 0x817530\n1 ff20\n2 12\n2 0x1f\n").unwrap();
        assert_eq!(
            Vec::from(instrs),
            vec![
                Instr::Load(Addr(0x817530)),
                Instr::Store(Addr(0xff20)),
                Instr::Other(12),
                Instr::Other(0x1f),
            ]
        );
    }

    #[test]
    fn ignores_trailing_whitespace() {
        let instrs = parse_str("0 4 \n").unwrap();
        assert_eq!(Vec::from(instrs), vec![Instr::Load(Addr(4))]);
    }

    #[test]
    fn rejects_blank_lines() {
        let err = parse_str("0 4\n\n1 8\n").unwrap_err();
        assert!(format!("{err:#}").contains(":2"));
    }

    #[test]
    fn rejects_unknown_operations_and_bad_operands() {
        assert!(parse_str("3 4\n").is_err());
        assert!(parse_str("0 zz\n").is_err());
        assert!(parse_str("0\n").is_err());
        assert!(parse_str("0 4 4\n").is_err());
    }

    #[test]
    fn loads_one_trace_per_core() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("t");
        let base = base.to_str().unwrap();
        for id in 0..NUM_CORES {
            std::fs::write(format!("{base}_{id}.data"), format!("2 {id}\n")).unwrap();
        }
        let traces = load_traces(base).unwrap();
        assert_eq!(traces.len(), NUM_CORES);
        assert_eq!(traces[3].front(), Some(&Instr::Other(3)));
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let err = load_traces("/nonexistent/trace").unwrap_err();
        assert!(format!("{err:#}").contains("trace_0.data"));
    }
}
