mod tests_reader;
