/// Marker comment proving a source has already been woven. A source carrying
/// this line is never recompiled.
pub(crate) const WEAVE_MARKER: &str = "// @woven by weftc -- do not edit";

/// Prefix of the hidden storage slot an intercepted property migrates into.
pub(crate) const SHADOW_PREFIX: &str = "__backing_";

pub(crate) fn contains_marker(text: &str) -> bool {
    text.lines().any(|line| line.trim() == WEAVE_MARKER)
}

/// One item of a parsed source unit: an opaque text line, or a procedure
/// declaration the weaver may rename or append to.
#[derive(Clone, Debug)]
pub(crate) enum Item {
    Text(String),
    Proc(ProcDecl),
}

/// Procedure declaration in the minimal source model. The body is kept as
/// verbatim lines; the weaver never inspects it.
#[derive(Clone, Debug)]
pub(crate) struct ProcDecl {
    pub(crate) is_static: bool,
    pub(crate) name: String,
    pub(crate) params: Vec<String>,
    pub(crate) body: Vec<String>,
}

/// Parsed procedure-declaration model of one class's source text.
///
/// The variant counter is shared by every rename performed on the unit, so
/// generated names stay unique within the class.
#[derive(Clone, Debug, Default)]
pub(crate) struct SourceUnit {
    items: Vec<Item>,
    counter: u32,
}

impl SourceUnit {
    pub(crate) fn parse(text: &str) -> Self {
        let mut items = Vec::new();
        let mut lines = text.lines();
        while let Some(line) = lines.next() {
            let Some((is_static, name, params)) = parse_signature(line) else {
                items.push(Item::Text(line.to_string()));
                continue;
            };
            let mut body = Vec::new();
            let mut depth = 1i32;
            for body_line in lines.by_ref() {
                let opens = body_line.matches('{').count() as i32;
                let closes = body_line.matches('}').count() as i32;
                if depth + opens - closes <= 0 && body_line.trim() == "}" {
                    depth = 0;
                } else {
                    depth += opens - closes;
                }
                if depth == 0 {
                    break;
                }
                body.push(body_line.to_string());
            }
            items.push(Item::Proc(ProcDecl {
                is_static,
                name,
                params,
                body,
            }));
        }
        SourceUnit { items, counter: 0 }
    }

    pub(crate) fn has_proc(&self, name: &str) -> bool {
        self.proc(name).is_some()
    }

    pub(crate) fn proc(&self, name: &str) -> Option<&ProcDecl> {
        self.items.iter().find_map(|item| match item {
            Item::Proc(decl) if decl.name == name => Some(decl),
            _ => None,
        })
    }

    /// Rename a declared procedure in place. Returns false when the
    /// procedure cannot be located; the caller decides how loudly to fail.
    pub(crate) fn rename_proc(&mut self, from: &str, to: &str) -> bool {
        for item in &mut self.items {
            if let Item::Proc(decl) = item {
                if decl.name == from {
                    decl.name = to.to_string();
                    return true;
                }
            }
        }
        false
    }

    pub(crate) fn push_proc(&mut self, decl: ProcDecl) {
        self.items.push(Item::Text(String::new()));
        self.items.push(Item::Proc(decl));
    }

    /// Fresh numbered variant name, monotonically increasing within the class.
    pub(crate) fn variant_name(&mut self, base: &str) -> String {
        self.counter += 1;
        format!("{base}_{}", self.counter)
    }

    pub(crate) fn mark_woven(&mut self) {
        self.items.insert(0, Item::Text(WEAVE_MARKER.to_string()));
    }

    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            match item {
                Item::Text(line) => {
                    out.push_str(line);
                    out.push('\n');
                }
                Item::Proc(decl) => {
                    let qualifier = if decl.is_static { "static " } else { "" };
                    out.push_str(&format!(
                        "{qualifier}proc {}({}) {{\n",
                        decl.name,
                        decl.params.join(", ")
                    ));
                    for line in &decl.body {
                        out.push_str(line);
                        out.push('\n');
                    }
                    out.push_str("}\n");
                }
            }
        }
        out
    }
}

fn parse_signature(line: &str) -> Option<(bool, String, Vec<String>)> {
    let trimmed = line.trim();
    let (is_static, rest) = match trimmed.strip_prefix("static proc ") {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix("proc ")?),
    };
    let open = rest.find('(')?;
    let close = rest.find(')')?;
    if close < open || !rest[close + 1..].trim().eq("{") {
        return None;
    }
    let name = rest[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    let params = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect();
    Some((is_static, name.to_string(), params))
}
