#[rocket::launch]
fn rocket() -> _ {
    let rocket = csv_importer::rocket();
    log::info!("Starting CSV importer API server");
    rocket
}
