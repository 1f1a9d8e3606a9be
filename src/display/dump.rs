use crate::store::{DataVector, VectorStorage};
use crate::system::{Group, System, TransferKey, VarManager};
use std::fmt::Write;

/// Renders the finalized tree: every unit with its storage ranges, the
/// variables it holds and the connections each composite owns.
///
/// With `deriv` set the derivative vectors are shown instead of the values.
pub fn format_tree(root: &Group, vm: &VarManager, deriv: bool) -> String {
    let (params, unknowns) = if deriv { (&vm.dparams, &vm.dunknowns) } else { (&vm.params, &vm.unknowns) };
    let mut dumper = Dumper { params, unknowns, output: String::new() };

    let _ = writeln!(
        dumper.output,
        "MODEL DUMP ({}): {} = {} entries, {} = {} entries",
        if deriv { "derivatives" } else { "values" },
        params.name(),
        params.len(),
        unknowns.name(),
        unknowns.len()
    );
    let _ = writeln!(dumper.output, "--------------------------------------------------");
    dumper.group(root, 0);
    dumper.output
}

struct Dumper<'a> {
    params: &'a DataVector,
    unknowns: &'a DataVector,
    output: String,
}

impl Dumper<'_> {
    fn group(&mut self, group: &Group, level: usize) {
        let indent = "  ".repeat(level);
        let label = if group.pathname().is_empty() { "<root>" } else { group.name() };
        let (min, max) = group.req_procs();
        let _ = writeln!(
            self.output,
            "{}{} [group{}] u={:?} p={:?} procs=({}, {})",
            indent,
            label,
            if group.is_active() { "" } else { ", inactive" },
            group.u_range(),
            group.p_range(),
            min,
            max.map_or("*".to_string(), |m| m.to_string())
        );

        if let Some(pair) = group.plan(&TransferKey::Full) {
            for (tgt, src) in &pair.fwd.vec_conns {
                let _ = writeln!(self.output, "{}  {} -> {}", indent, src, tgt);
            }
            for (tgt, src) in &pair.fwd.byobj_conns {
                let _ = writeln!(self.output, "{}  {} -> {} (by obj)", indent, src, tgt);
            }
        }

        for sub in group.subsystems(false) {
            match sub {
                System::Group(g) => self.group(g, level + 1),
                System::Component(c) => {
                    let _ = writeln!(
                        self.output,
                        "{}  {} [{:?}{}] u={:?} p={:?}",
                        indent,
                        c.name(),
                        c.kind(),
                        if c.is_active() { "" } else { ", inactive" },
                        c.u_range(),
                        c.p_range()
                    );
                    let p = c.p_view();
                    let u = c.u_view();
                    for name in &p.names {
                        self.var(&indent, self.params, &p.abs(name));
                    }
                    for name in &u.names {
                        self.var(&indent, self.unknowns, &u.abs(name));
                    }
                    for name in p.objects.iter().chain(&u.objects) {
                        let _ = writeln!(self.output, "{}      {} (by obj)", indent, name);
                    }
                }
            }
        }
    }

    fn var(&mut self, indent: &str, vec: &DataVector, path: &str) {
        let range = vec.slice_range(path).unwrap_or(0..0);
        let values = vec.get(path).map(|v| format!("{:?}", v)).unwrap_or_else(|_| "?".to_string());
        let _ = writeln!(self.output, "{}      {} {}[{:?}] = {}", indent, path, vec.name(), range, values);
    }
}
