pub mod product_commands;
