// Process state code expansion
//
// Linux reports a single code letter in /proc/<pid>/status; BSD-style `ps`
// (macOS) reports a code letter followed by modifier flags such as `Ss+`.

/// Linux state codes (see proc(5))
const LINUX_STATES: &[(char, &str)] = &[
    ('R', "Running"),
    ('S', "Sleeping (interruptible)"),
    ('D', "Waiting (uninterruptible)"),
    ('Z', "Zombie"),
    ('T', "Stopped"),
    ('t', "Tracing stop"),
    ('X', "Dead"),
    ('I', "Idle"),
];

const LINUX_MODIFIERS: &[(char, &str)] = &[
    ('<', "high-priority"),
    ('N', "low-priority"),
    ('L', "pages locked"),
    ('s', "session leader"),
    ('l', "multi-threaded"),
    ('+', "foreground"),
];

/// BSD `ps` state codes (see ps(1) on macOS)
const BSD_STATES: &[(char, &str)] = &[
    ('R', "Running"),
    ('S', "Sleeping"),
    ('I', "Idle"),
    ('T', "Stopped"),
    ('U', "Uninterruptible wait"),
    ('Z', "Zombie"),
];

const BSD_MODIFIERS: &[(char, &str)] = &[
    ('+', "foreground"),
    ('<', "high-priority"),
    ('N', "low-priority"),
    ('E', "trying to exit"),
    ('L', "pages locked"),
    ('s', "session leader"),
    ('l', "multi-threaded"),
    ('W', "swapped out"),
    ('X', "traced"),
];

/// Expand a Linux state string such as `S` or `Ss+`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub fn expand_linux_state(state: &str) -> String {
    expand(state, LINUX_STATES, LINUX_MODIFIERS)
}

/// Expand a BSD/macOS `ps` state string such as `Ss`
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub fn expand_bsd_state(state: &str) -> String {
    expand(state, BSD_STATES, BSD_MODIFIERS)
}

fn lookup(table: &[(char, &'static str)], code: char) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

fn expand(state: &str, states: &[(char, &'static str)], modifiers: &[(char, &'static str)]) -> String {
    let mut chars = state.chars();
    let Some(code) = chars.next() else {
        return String::new();
    };

    let mut expanded = match lookup(states, code) {
        Some(name) => name.to_string(),
        // Unknown codes pass through whole
        None => state.to_string(),
    };

    // Modifier order follows the state string; repeats are kept
    let flags: Vec<&str> = chars.filter_map(|c| lookup(modifiers, c)).collect();
    if !flags.is_empty() {
        expanded.push_str(&format!(" ({})", flags.join(", ")));
    }

    expanded
}
