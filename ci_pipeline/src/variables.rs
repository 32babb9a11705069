//! `${name}` substitution over raw definition text.
//!
//! Runs on the raw document before it is parsed. A single left-to-right
//! scan: inserted values are never re-scanned, unknown tokens stay verbatim.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").unwrap());

/// A named value a user can reference from their definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVariable {
    pub id: i64,
    /// Owner; `None` together with `public` means a global variable.
    pub user_id: Option<i64>,
    pub name: String,
    pub value: String,
    pub public: bool,
}

impl UserVariable {
    pub fn pair(&self) -> (&str, &str) {
        (self.name.as_str(), self.value.as_str())
    }
}

/// Replace every `${name}` in `content` with its value.
///
/// When a name appears more than once in `variables` the first entry wins.
pub fn substitute<'a, I>(content: &str, variables: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut lookup: HashMap<&str, &str> = HashMap::new();
    for (name, value) in variables {
        lookup.entry(name).or_insert(value);
    }
    if lookup.is_empty() {
        return content.to_string();
    }

    TOKEN_REGEX
        .replace_all(content, |caps: &Captures<'_>| match lookup.get(&caps[1]) {
            Some(value) => (*value).to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Substitute a stored variable set.
pub fn substitute_user_variables(content: &str, variables: &[UserVariable]) -> String {
    substitute(content, variables.iter().map(UserVariable::pair))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, value: &str) -> UserVariable {
        UserVariable {
            id: 0,
            user_id: Some(1),
            name: name.to_string(),
            value: value.to_string(),
            public: false,
        }
    }

    #[test]
    fn replaces_every_occurrence() {
        let out = substitute(
            "url: ${host}/${repo}.git\nmirror: ${host}",
            [("host", "https://git.example.com"), ("repo", "team/app")],
        );
        assert_eq!(
            out,
            "url: https://git.example.com/team/app.git\nmirror: https://git.example.com"
        );
    }

    #[test]
    fn empty_variable_list_is_a_no_op() {
        let text = "secret: ${token}";
        assert_eq!(substitute_user_variables(text, &[]), text);
    }

    #[test]
    fn unknown_tokens_are_left_verbatim() {
        let out = substitute("a: ${known} b: ${unknown}", [("known", "1")]);
        assert_eq!(out, "a: 1 b: ${unknown}");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let vars = vec![var("outer", "${inner}"), var("inner", "deep")];
        let once = substitute_user_variables("x: ${outer}", &vars);
        assert_eq!(once, "x: ${inner}");

        // a second pass expands what the first one inserted
        let twice = substitute_user_variables(&once, &vars);
        assert_eq!(twice, "x: deep");
    }

    #[test]
    fn first_definition_of_a_name_wins() {
        let vars = vec![var("branch", "main"), var("branch", "develop")];
        assert_eq!(substitute_user_variables("${branch}", &vars), "main");
    }

    #[test]
    fn idempotent_when_values_hold_no_tokens() {
        let vars = vec![var("user", "deploy"), var("port", "2222")];
        let once = substitute_user_variables("${user}@host:${port}", &vars);
        assert_eq!(substitute_user_variables(&once, &vars), once);
    }
}
