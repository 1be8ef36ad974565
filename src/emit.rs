//! Reference Rust emitter.
//!
//! Production back-ends are external collaborators; this one renders a
//! [`Machine`] as a self-contained Rust module so the back-end facing model
//! is exercised end-to-end and generated output has a canonical shape. The
//! emitted parser is incremental: it returns `Status::Paused` at the end of
//! a chunk and resumes from its saved state on the next call.
//!
//! Three cooperating functions — `emit_node`, `emit_consumer`, `emit_inst` —
//! share an [`EmitCtx`] (writer, interned tables, depth counter for unique
//! locals). Limitations of the reference output: span positions are
//! buffer-relative, and a literal sitting under a span capture must fit
//! within a single chunk.

use crate::backend::{collect_bitmaps, state_label, BitmapTab};
use crate::grammar::{Base, Call, Selector, Typ};
use crate::inst::{Check, Consumer, Instruction};
use crate::machine::Machine;
use anyhow::{bail, Result};
use indexmap::IndexMap;
use std::io::Write;

/// Generate parser code for a machine into an output Rust stream.
pub fn generate<W: Write>(machine: &Machine, out: &mut W) -> Result<()> {
    let bitmaps = collect_bitmaps(machine);
    let mut seqs: IndexMap<Vec<u8>, ()> = IndexMap::new();
    let mut wants_hex = false;
    for node in &machine.nodes {
        node.body.visit(&mut |inst| {
            if let Instruction::Consumer(Consumer::Is { subject, .. }) = inst {
                seqs.entry(subject.clone()).or_insert(());
            }
            if let Instruction::Call {
                call:
                    Call::MulAdd {
                        base: Base::Hex, ..
                    },
                ..
            } = inst
            {
                wants_hex = true;
            }
        });
    }

    writeln!(out, "/*")?;
    writeln!(out, "Produced by parser generator WIREGEN")?;
    writeln!(
        out,
        "Copyright (c) 2005-2025 IKH Software, Inc. <support@ikhsoftware.com>"
    )?;
    writeln!(out, "*/\n")?;

    writeln!(out, "pub const N_STATES: usize = {};", machine.nodes.len())?;
    writeln!(
        out,
        "pub const N_PROPS: usize = {};",
        machine.storage.props.len()
    )?;
    writeln!(out, "pub const N_BITMAPS: usize = {};", bitmaps.len())?;
    writeln!(out)?;

    for (ix, interval) in bitmaps.iter() {
        writeln!(out, "/* {:?} */", interval)?;
        writeln!(out, "pub static BITMAP{}: [bool; 256] = [", ix)?;
        let table = interval.bitmap();
        for row in table.chunks(16) {
            let cells: Vec<&str> = row.iter().map(|b| if *b { "true" } else { "false" }).collect();
            writeln!(out, "    {},", cells.join(", "))?;
        }
        writeln!(out, "];\n")?;
    }

    for (ix, (subject, _)) in seqs.iter().enumerate() {
        let bytes: Vec<String> = subject.iter().map(|b| format!("0x{:02x}", b)).collect();
        writeln!(
            out,
            "static SEQ{}: [u8; {}] = [{}]; // {:?}",
            ix,
            subject.len(),
            bytes.join(", "),
            String::from_utf8_lossy(subject)
        )?;
    }
    if !seqs.is_empty() {
        writeln!(out)?;
    }

    writeln!(
        out,
        "#[derive(Debug, Clone, Copy, PartialEq, Eq)]\npub enum Status {{"
    )?;
    writeln!(out, "    Paused,")?;
    writeln!(out, "    Error(u64),")?;
    writeln!(out, "}}\n")?;

    writeln!(out, "pub trait Callbacks {{")?;
    for cb in &machine.storage.callbacks {
        if cb.is_span {
            writeln!(
                out,
                "    fn {}(&mut self, start: usize, end: usize, buffer: &[u8]) -> u64;",
                cb.name
            )?;
        } else {
            let mut args = String::new();
            for &p in &cb.args {
                args.push_str(&format!(", {}: u64", machine.storage.props[p].name));
            }
            writeln!(out, "    fn {}(&mut self{}) -> u64;", cb.name, args)?;
        }
    }
    writeln!(out, "}}\n")?;

    if wants_hex {
        writeln!(out, "fn hex_digit(b: u8) -> u64 {{")?;
        writeln!(out, "    match b {{")?;
        writeln!(out, "        b'0'..=b'9' => (b - b'0') as u64,")?;
        writeln!(out, "        b'a'..=b'f' => (b - b'a' + 10) as u64,")?;
        writeln!(out, "        b'A'..=b'F' => (b - b'A' + 10) as u64,")?;
        writeln!(out, "        _ => 0,")?;
        writeln!(out, "    }}")?;
        writeln!(out, "}}\n")?;
    }

    writeln!(out, "#[derive(Debug, Default)]\npub struct Parser {{")?;
    writeln!(out, "    state: usize,")?;
    if !seqs.is_empty() {
        writeln!(out, "    seq: usize,")?;
    }
    for prop in &machine.storage.props {
        if prop.typ.is_span() {
            writeln!(out, "    {}: Option<usize>,", prop.name)?;
        } else {
            writeln!(out, "    {}: {},", prop.name, prop.typ.rust_type())?;
        }
    }
    writeln!(out, "}}\n")?;

    let mut ctx = EmitCtx {
        out,
        machine,
        bitmaps,
        seqs,
        depth: 0,
    };
    ctx.emit_run()?;
    Ok(())
}

enum Cur {
    /// The tested byte is bound as `b`.
    Var,
    /// No byte is bound; read through the cursor.
    Mem,
}

impl Cur {
    fn expr(&self) -> &'static str {
        match self {
            Cur::Var => "b",
            Cur::Mem => "(*data.get(pos).unwrap_or(&0))",
        }
    }
}

struct EmitCtx<'m, W: Write> {
    out: &'m mut W,
    machine: &'m Machine,
    bitmaps: BitmapTab,
    seqs: IndexMap<Vec<u8>, ()>,
    depth: usize,
}

fn pad(n: usize) -> String {
    "    ".repeat(n)
}

impl<'m, W: Write> EmitCtx<'m, W> {
    fn prop_name(&self, prop: usize) -> &str {
        self.machine.storage.props[prop].name.as_str()
    }

    fn prop_typ(&self, prop: usize) -> Typ {
        self.machine.storage.props[prop].typ
    }

    fn emit_run(&mut self) -> Result<()> {
        writeln!(self.out, "impl Parser {{")?;
        writeln!(self.out, "    pub fn new() -> Self {{")?;
        writeln!(self.out, "        Self::default()")?;
        writeln!(self.out, "    }}\n")?;
        writeln!(
            self.out,
            "    pub fn run(&mut self, cb: &mut impl Callbacks, data: &[u8]) -> Status {{"
        )?;
        writeln!(self.out, "        let mut pos = 0usize;")?;
        writeln!(self.out, "        'run: loop {{")?;
        writeln!(self.out, "            match self.state {{")?;
        let machine = self.machine;
        for ix in 0..machine.nodes.len() {
            writeln!(
                self.out,
                "                {} => {{ // {}: {}",
                ix,
                state_label(ix),
                machine.names[ix]
            )?;
            match &machine.nodes[ix].body {
                Instruction::Consumer(consumer) => self.emit_consumer(consumer, 5)?,
                tail => self.emit_inst(tail, 5, &Cur::Mem)?,
            }
            writeln!(self.out, "                }}")?;
        }
        writeln!(self.out, "                _ => return Status::Error(0),")?;
        writeln!(self.out, "            }}")?;
        writeln!(self.out, "        }}")?;
        writeln!(self.out, "    }}")?;
        writeln!(self.out, "}}")?;
        Ok(())
    }

    fn emit_peek(&mut self, ind: usize) -> Result<()> {
        let i = pad(ind);
        writeln!(self.out, "{}let b = match data.get(pos) {{", i)?;
        writeln!(self.out, "{}    Some(b) => *b,", i)?;
        writeln!(self.out, "{}    None => return Status::Paused,", i)?;
        writeln!(self.out, "{}}};", i)?;
        Ok(())
    }

    fn check_cond(&self, check: &Check) -> String {
        match check {
            Check::Byte(b) => format!("b == 0x{:02x}", b),
            Check::Range(r) => format!("(0x{:02x}..=0x{:02x}).contains(&b)", r.lo, r.hi),
            Check::Map(interval) => match self.bitmaps.get(interval) {
                Some(ix) => format!("BITMAP{}[b as usize]", ix),
                None => unreachable!(),
            },
        }
    }

    fn emit_consumer(&mut self, consumer: &Consumer, ind: usize) -> Result<()> {
        let i = pad(ind);
        match consumer {
            Consumer::Char { byte, ok, err } => {
                self.emit_peek(ind)?;
                writeln!(self.out, "{}if b == 0x{:02x} {{", i, byte)?;
                self.emit_inst(ok, ind + 1, &Cur::Var)?;
                writeln!(self.out, "{}}} else {{", i)?;
                self.emit_inst(err, ind + 1, &Cur::Var)?;
                writeln!(self.out, "{}}}", i)?;
            }
            Consumer::Range { range, ok, err } => {
                self.emit_peek(ind)?;
                writeln!(
                    self.out,
                    "{}if (0x{:02x}..=0x{:02x}).contains(&b) {{",
                    i, range.lo, range.hi
                )?;
                self.emit_inst(ok, ind + 1, &Cur::Var)?;
                writeln!(self.out, "{}}} else {{", i)?;
                self.emit_inst(err, ind + 1, &Cur::Var)?;
                writeln!(self.out, "{}}}", i)?;
            }
            Consumer::Map { interval, ok, err } => {
                self.emit_peek(ind)?;
                let ix = match self.bitmaps.get(interval) {
                    Some(ix) => ix,
                    None => bail!("bitmap not interned: {:?}", interval),
                };
                writeln!(self.out, "{}if BITMAP{}[b as usize] {{", i, ix)?;
                self.emit_inst(ok, ind + 1, &Cur::Var)?;
                writeln!(self.out, "{}}} else {{", i)?;
                self.emit_inst(err, ind + 1, &Cur::Var)?;
                writeln!(self.out, "{}}}", i)?;
            }
            Consumer::Chars { arms, otherwise } => {
                self.emit_peek(ind)?;
                writeln!(self.out, "{}match b {{", i)?;
                for (byte, inst) in arms {
                    writeln!(self.out, "{}    0x{:02x} => {{", i, byte)?;
                    self.emit_inst(inst, ind + 2, &Cur::Var)?;
                    writeln!(self.out, "{}    }}", i)?;
                }
                writeln!(self.out, "{}    _ => {{", i)?;
                self.emit_inst(otherwise, ind + 2, &Cur::Var)?;
                writeln!(self.out, "{}    }}", i)?;
                writeln!(self.out, "{}}}", i)?;
            }
            Consumer::Mixed { arms, otherwise } => {
                self.emit_peek(ind)?;
                for (n, (check, inst)) in arms.iter().enumerate() {
                    let kw = if n == 0 { "if" } else { "} else if" };
                    let cond = self.check_cond(check);
                    writeln!(self.out, "{}{} {} {{", i, kw, cond)?;
                    self.emit_inst(inst, ind + 1, &Cur::Var)?;
                }
                writeln!(self.out, "{}}} else {{", i)?;
                self.emit_inst(otherwise, ind + 1, &Cur::Var)?;
                writeln!(self.out, "{}}}", i)?;
            }
            Consumer::Is { subject, ok, err } => {
                let k = match self.seqs.get_index_of(subject) {
                    Some(k) => k,
                    None => bail!("literal not interned: {}", hex::encode(subject)),
                };
                let len = subject.len();
                if matches!(ok.as_ref(), Instruction::Capture { .. }) {
                    // Non-committing form: the capture in the ok-arm must
                    // observe the position of the literal's first byte.
                    writeln!(self.out, "{}let have = data.len() - pos;", i)?;
                    writeln!(self.out, "{}if have < {} {{", i, len)?;
                    writeln!(self.out, "{}    if data[pos..] == SEQ{}[..have] {{", i, k)?;
                    writeln!(self.out, "{}        return Status::Paused;", i)?;
                    writeln!(self.out, "{}    }}", i)?;
                    self.emit_inst(err, ind + 1, &Cur::Mem)?;
                    writeln!(
                        self.out,
                        "{}}} else if data[pos..pos + {}] == SEQ{} {{",
                        i, len, k
                    )?;
                    self.emit_inst(ok, ind + 1, &Cur::Mem)?;
                    writeln!(self.out, "{}}} else {{", i)?;
                    self.emit_inst(err, ind + 1, &Cur::Mem)?;
                    writeln!(self.out, "{}}}", i)?;
                } else {
                    writeln!(self.out, "{}while self.seq < {} {{", i, len)?;
                    writeln!(self.out, "{}    match data.get(pos) {{", i)?;
                    writeln!(
                        self.out,
                        "{}        Some(&b) if b == SEQ{}[self.seq] => {{",
                        i, k
                    )?;
                    writeln!(self.out, "{}            self.seq += 1;", i)?;
                    writeln!(self.out, "{}            pos += 1;", i)?;
                    writeln!(self.out, "{}        }}", i)?;
                    writeln!(self.out, "{}        Some(_) => {{", i)?;
                    writeln!(self.out, "{}            self.seq = 0;", i)?;
                    self.emit_inst(err, ind + 3, &Cur::Mem)?;
                    writeln!(self.out, "{}        }}", i)?;
                    writeln!(self.out, "{}        None => return Status::Paused,", i)?;
                    writeln!(self.out, "{}    }}", i)?;
                    writeln!(self.out, "{}}}", i)?;
                    writeln!(self.out, "{}self.seq = 0;", i)?;
                    self.emit_inst(ok, ind, &Cur::Mem)?;
                }
            }
            Consumer::Consume { prop, ok } => {
                let name = self.prop_name(*prop).to_owned();
                let typ = self.prop_typ(*prop).rust_type();
                writeln!(self.out, "{}let want = self.{} as usize;", i, name)?;
                writeln!(self.out, "{}let have = data.len() - pos;", i)?;
                writeln!(self.out, "{}if have < want {{", i)?;
                writeln!(self.out, "{}    self.{} = (want - have) as {};", i, name, typ)?;
                writeln!(self.out, "{}    return Status::Paused;", i)?;
                writeln!(self.out, "{}}}", i)?;
                writeln!(self.out, "{}pos += want;", i)?;
                writeln!(self.out, "{}self.{} = 0;", i, name)?;
                self.emit_inst(ok, ind, &Cur::Mem)?;
            }
        }
        Ok(())
    }

    fn emit_call(&mut self, call: &Call, ind: usize, cur: &Cur) -> Result<()> {
        let i = pad(ind);
        match call {
            Call::Arbitrary(ix) => {
                let (name, args) = self.callback_invocation(*ix)?;
                writeln!(self.out, "{}let code = cb.{}({});", i, name, args)?;
                writeln!(self.out, "{}if code != 0 {{", i)?;
                writeln!(self.out, "{}    return Status::Error(code);", i)?;
                writeln!(self.out, "{}}}", i)?;
            }
            Call::MulAdd { base, prop } => {
                let name = self.prop_name(*prop).to_owned();
                let typ = self.prop_typ(*prop).rust_type();
                let digit = match base {
                    Base::Hex => format!("hex_digit({}) as {}", cur.expr(), typ),
                    _ => format!("({} - 0x30) as {}", cur.expr(), typ),
                };
                writeln!(
                    self.out,
                    "{}self.{} = self.{}.wrapping_mul({}).wrapping_add({});",
                    i,
                    name,
                    name,
                    base.radix(),
                    digit
                )?;
            }
            Call::LoadNum(prop) => {
                let name = self.prop_name(*prop).to_owned();
                let typ = self.prop_typ(*prop).rust_type();
                writeln!(
                    self.out,
                    "{}self.{} = ({} - 0x30) as {};",
                    i,
                    name,
                    cur.expr(),
                    typ
                )?;
            }
            Call::CallStore { prop, call } => {
                let (name, args) = self.callback_invocation(*call)?;
                let prop_name = self.prop_name(*prop).to_owned();
                let typ = self.prop_typ(*prop).rust_type();
                writeln!(self.out, "{}let ret = cb.{}({});", i, name, args)?;
                writeln!(self.out, "{}self.{} = ret as {};", i, prop_name, typ)?;
            }
            Call::Store { prop, value } => {
                let name = self.prop_name(*prop).to_owned();
                writeln!(self.out, "{}self.{} = {};", i, name, value)?;
            }
        }
        Ok(())
    }

    fn callback_invocation(&self, ix: usize) -> Result<(String, String)> {
        let decl = match self.machine.storage.callbacks.get(ix) {
            Some(decl) => decl,
            None => bail!("callback {} not declared", ix),
        };
        let args: Vec<String> = decl
            .args
            .iter()
            .map(|&p| format!("self.{} as u64", self.prop_name(p)))
            .collect();
        Ok((decl.name.to_string(), args.join(", ")))
    }

    fn selector_value(&mut self, selector: &Selector, ind: usize, var: &str) -> Result<()> {
        let i = pad(ind);
        match selector {
            Selector::Method(prop) => {
                let name = self.prop_name(*prop).to_owned();
                writeln!(self.out, "{}let {} = self.{} as u64;", i, var, name)?;
            }
            Selector::Call(Call::Arbitrary(ix)) => {
                let (name, args) = self.callback_invocation(*ix)?;
                writeln!(self.out, "{}let {} = cb.{}({});", i, var, name, args)?;
            }
            Selector::Call(Call::CallStore { prop, call }) => {
                let (name, args) = self.callback_invocation(*call)?;
                let prop_name = self.prop_name(*prop).to_owned();
                let typ = self.prop_typ(*prop).rust_type();
                writeln!(self.out, "{}let {} = cb.{}({});", i, var, name, args)?;
                writeln!(self.out, "{}self.{} = {} as {};", i, prop_name, var, typ)?;
            }
            Selector::Call(other) => bail!("unsupported selector call {:?}", other),
        }
        Ok(())
    }

    fn emit_inst(&mut self, inst: &Instruction, ind: usize, cur: &Cur) -> Result<()> {
        let i = pad(ind);
        match inst {
            Instruction::Goto(target) => {
                writeln!(self.out, "{}self.state = {};", i, target)?;
                writeln!(self.out, "{}continue 'run;", i)?;
            }
            Instruction::Error(code) => {
                writeln!(self.out, "{}return Status::Error({});", i, code)?;
            }
            Instruction::Next { count, next } => {
                writeln!(self.out, "{}pos += {};", i, count)?;
                self.emit_inst(next, ind, cur)?;
            }
            Instruction::Store { prop, data, next } => {
                let name = self.prop_name(*prop).to_owned();
                let typ = self.prop_typ(*prop).rust_type();
                match data {
                    Some(b) => writeln!(self.out, "{}self.{} = 0x{:02x};", i, name, b)?,
                    None => writeln!(self.out, "{}self.{} = {} as {};", i, name, cur.expr(), typ)?,
                }
                self.emit_inst(next, ind, cur)?;
            }
            Instruction::Capture { prop, next } => {
                let name = self.prop_name(*prop).to_owned();
                writeln!(self.out, "{}self.{} = Some(pos);", i, name)?;
                self.emit_inst(next, ind, cur)?;
            }
            Instruction::Close { prop, next } => {
                let name = self.prop_name(*prop).to_owned();
                let cbname = match self.machine.storage.span_callback_for(*prop) {
                    Some((_, decl)) => decl.name.to_string(),
                    None => bail!("no span callback for property {}", prop),
                };
                writeln!(
                    self.out,
                    "{}let start = self.{}.take().unwrap_or(pos);",
                    i, name
                )?;
                writeln!(self.out, "{}let code = cb.{}(start, pos, data);", i, cbname)?;
                writeln!(self.out, "{}if code != 0 {{", i)?;
                writeln!(self.out, "{}    return Status::Error(code);", i)?;
                writeln!(self.out, "{}}}", i)?;
                self.emit_inst(next, ind, cur)?;
            }
            Instruction::Call { call, next } => {
                self.emit_call(call, ind, cur)?;
                self.emit_inst(next, ind, cur)?;
            }
            Instruction::Select {
                selector,
                arms,
                otherwise,
            } => {
                self.depth += 1;
                let var = format!("v{}", self.depth);
                self.selector_value(selector, ind, &var)?;
                writeln!(self.out, "{}match {} {{", i, var)?;
                for (value, arm) in arms {
                    writeln!(self.out, "{}    {} => {{", i, value)?;
                    self.emit_inst(arm, ind + 2, cur)?;
                    writeln!(self.out, "{}    }}", i)?;
                }
                writeln!(self.out, "{}    _ => {{", i)?;
                self.emit_inst(otherwise, ind + 2, cur)?;
                writeln!(self.out, "{}    }}", i)?;
                writeln!(self.out, "{}}}", i)?;
            }
            Instruction::Consumer(_) => {
                bail!("consumer in tail position; the translator materializes these into nodes")
            }
        }
        Ok(())
    }
}
