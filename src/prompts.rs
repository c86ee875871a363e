//! Prompt text for the two model sessions.

/// System instruction for the SQL session: the database schema and the
/// expected reply format.
pub const DB_SCHEMA_PROMPT: &str = r#"
You are provided with a database schema that contains multiple tables, each with specific columns and properties. Here are the details of the tables:

Table: departments
Columns:
dept_no: type char(4), primary key
dept_name: type varchar(40)

Table: dept_emp
Columns:
emp_no: type INTEGER, primary key
dept_no: type char(4), primary key, foreign key referencing departments(dept_no)
from_date: type date
to_date: type date

Table: dept_manager
Columns:
dept_no: type char(4), primary key, foreign key referencing departments(dept_no)
emp_no: type INTEGER, primary key, foreign key referencing employees(emp_no)
from_date: type date
to_date: type date

Table: employees
Columns:
emp_no: type INTEGER, primary key
birth_date: type date
first_name: type varchar(14)
last_name: type varchar(16)
gender: type TEXT
hire_date: type date

Table: salaries
Columns:
emp_no: type INTEGER, primary key, foreign key referencing employees(emp_no)
salary: type INTEGER
from_date: type date, primary key
to_date: type date

Table: titles
Columns:
emp_no: type INTEGER, primary key, foreign key referencing employees(emp_no)
title: type varchar(50)
from_date: date, primary key
to_date: date, nullable

The database is SQLite. Generate only a SQL query based on the question. Return the response in this exact format:
{
    "sqlQuery": "YOUR_SQL_QUERY_HERE",
    "description": "BRIEF_DESCRIPTION_OF_QUERY"
}
"#;

/// System instruction for the answer session.
pub const RESPONSE_PROMPT: &str = r#"
You are a chatbot assistant designed to transform some data into a user friendly format. Follow these steps:

1. Read the provided data.
2. Extract the necessary data from these results.
3. Combine and structure this data into a human-readable format.
4. Output the final message in JSON format.
5. Make sure the message is clear and informative for a general user.

Example structure:
```json
{
  "message": "string"
}
```

Expected JSON output:
```json
{
  "message": "We have 3 users: John (30 years old) from New York, Alice (25 years old) from Los Angeles, and Bob (22 years old) from Chicago."
}
```

Make the message as clear and informative as possible for a general user. Simplify complex data and highlight the most important parts.
Do not add a text like 'the query returned'. Just explain the data in a user-friendly way.
Answer in the language the user asked the question in.
"#;

/// Suggested questions shown by the CLI and the chat server.
pub const EXAMPLE_QUESTIONS: &[&str] = &[
    "How many employees are in the company",
    "Who is the highest paid employee and what is his position?",
    "En yaşlı kişi kim?",
    "Şirkette kaç çalışan var?",
    "Do you know a person joined the company before 1998. Can you give me a name.",
    "Who is the oldest person in the company?",
];

/// Turn sent to the SQL session.
pub fn sql_turn(question: &str) -> String {
    format!(
        "Generate a SQL query for this question: {}\nRespond only with a JSON object in the specified format.",
        question
    )
}

/// Turn sent to the answer session.
pub fn answer_turn(question: &str, data: &str) -> String {
    format!(
        "The question of the user was: {}.\n\n ----- \n\n The result of the query is: {}\n\n ---- \n\n Now give user a pretty message in the specified JSON format.",
        question, data
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_turn_embeds_question() {
        let turn = sql_turn("How many employees are in the company");
        assert!(turn.starts_with("Generate a SQL query for this question: How many employees"));
        assert!(turn.ends_with("Respond only with a JSON object in the specified format."));
    }

    #[test]
    fn test_answer_turn_embeds_data() {
        let turn = answer_turn("How many employees?", "[[5]]");
        assert!(turn.contains("The question of the user was: How many employees?."));
        assert!(turn.contains("The result of the query is: [[5]]"));
    }

    #[test]
    fn test_schema_prompt_names_reply_fields() {
        assert!(DB_SCHEMA_PROMPT.contains("\"sqlQuery\""));
        assert!(RESPONSE_PROMPT.contains("\"message\""));
    }
}
