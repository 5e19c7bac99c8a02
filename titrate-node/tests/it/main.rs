mod adaptive;
mod driver;
mod invariants;
