//! Greets every contact with their current age.
//!
//! Run with `RUST_LOG=shimmytmpl=debug` to see parse and execution events.

use chrono::{Datelike, Local, NaiveDate};
use shimmytmpl::{Arity, FunctionError, FunctionRegistry, Record, Template, TemplateSource, Value};
use tracing_subscriber::EnvFilter;

const GREETING: &str = "Happy Birthday, {{ .FirstName }} {{ .LastName }}!
You are {{ age .Birthday }} years old today!";

const DATE_LAYOUT: &str = "%m-%d-%Y";

#[derive(Debug)]
struct Person {
    first_name: String,
    last_name: String,
    birthday: String,
}

impl Person {
    fn new(first_name: &str, last_name: &str, birthday: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            birthday: birthday.to_string(),
        }
    }
}

impl Record for Person {
    fn type_name(&self) -> &str {
        "Person"
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "FirstName" => Some(self.first_name.clone().into()),
            "LastName" => Some(self.last_name.clone().into()),
            "Birthday" => Some(self.birthday.clone().into()),
            _ => None,
        }
    }

    fn method(&self, name: &str, _args: &[Value]) -> Option<Result<Value, FunctionError>> {
        match name {
            "Age" => Some(years_old(&self.birthday).map(Value::Int)),
            _ => None,
        }
    }

    fn field_names(&self) -> Vec<String> {
        ["FirstName", "LastName", "Birthday", "Age"]
            .map(String::from)
            .to_vec()
    }
}

/// Whole years since `birthday`, as of today.
fn years_old(birthday: &str) -> Result<i64, FunctionError> {
    let born = NaiveDate::parse_from_str(birthday, DATE_LAYOUT)?;
    let today = Local::now().date_naive();
    let mut years = i64::from(today.year() - born.year());
    if (today.month(), today.day()) < (born.month(), born.day()) {
        years -= 1;
    }
    Ok(years)
}

fn main() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let contacts = [
        Person::new("Allison", "DuMonte", "08-01-1984"),
        Person::new("Ben", "Ridley", "11-21-1992"),
        Person::new("Christina", "Chandler", "02-19-1987"),
        Person::new("Daniel", "Pulaski", "07-09-1989"),
    ];

    let mut funcs = FunctionRegistry::new();
    funcs.register("age", Arity::Exact(1), |args| match &args[0] {
        Value::String(birthday) => years_old(birthday).map(Value::Int),
        other => Err(format!("expected a date string, got {}", other.kind()).into()),
    });

    let tpl = Template::parse("greeting", GREETING, &funcs)
        .map_err(|err| TemplateSource::new("greeting", GREETING).report(err))?;

    let mut dest = String::new();
    for person in contacts {
        tpl.execute_to(&mut dest, &Value::record(person))
            .map_err(|err| tpl.report(err))?;
        println!("{dest}");
        dest.clear();
    }
    Ok(())
}
