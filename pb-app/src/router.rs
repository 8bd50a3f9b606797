use crate::menu::{CREATE_CALLBACK, Field, ROOT_CALLBACK};
use regex::Regex;

/// Value captured from callback data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Int(i64),
    Slug(String),
}

/// What a menu button press asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ShowRoot,
    Create,
    ShowField(Field),
    Select(Field, Param),
    CustomInput(Field),
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Root,
    Create,
    Show(Field),
    SelectInt(Field),
    SelectSlug(Field),
    Input(Field),
}

#[derive(Debug)]
struct Route {
    pattern: Regex,
    target: Target,
}

/// Ordered route table. First match wins.
#[derive(Debug)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Result<Self, regex::Error> {
        let mut table = vec![
            (regex::escape(ROOT_CALLBACK), Target::Root),
            (regex::escape(CREATE_CALLBACK), Target::Create),
        ];
        for field in Field::ALL {
            let base = regex::escape(&field.view_callback());
            table.push((base.clone(), Target::Show(field)));
            let select = match field {
                Field::Shape => (format!("{base}/([0-8])"), Target::SelectInt(field)),
                Field::Repeat => (format!("{base}/([1-6])"), Target::SelectInt(field)),
                Field::Extension => (
                    format!("{base}/(jpg|png|svg|gif)"),
                    Target::SelectSlug(field),
                ),
                Field::Iterations | Field::Alpha | Field::Size => {
                    (format!("{base}/([0-9]+)"), Target::SelectInt(field))
                }
            };
            table.push(select);
            if let Some(input) = field.input_callback() {
                table.push((regex::escape(&input), Target::Input(field)));
            }
        }

        let routes = table
            .into_iter()
            .map(|(pattern, target)| {
                Ok(Route {
                    pattern: Regex::new(&format!("^{pattern}$"))?,
                    target,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { routes })
    }

    /// Resolve callback data to an action. Unknown data and captures that
    /// cannot be converted (e.g. integer overflow) resolve to `None`.
    pub fn resolve(&self, data: &str) -> Option<Action> {
        self.routes.iter().find_map(|route| {
            let caps = route.pattern.captures(data)?;
            let capture = || caps.get(1).map(|m| m.as_str());
            match route.target {
                Target::Root => Some(Action::ShowRoot),
                Target::Create => Some(Action::Create),
                Target::Show(field) => Some(Action::ShowField(field)),
                Target::Input(field) => Some(Action::CustomInput(field)),
                Target::SelectInt(field) => {
                    let n = capture()?.parse::<i64>().ok()?;
                    Some(Action::Select(field, Param::Int(n)))
                }
                Target::SelectSlug(field) => {
                    let slug = capture()?.to_string();
                    Some(Action::Select(field, Param::Slug(slug)))
                }
            }
        })
    }
}
