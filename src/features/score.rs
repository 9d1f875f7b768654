//src/features/score.rs

use crate::config::ScoreModel;
use crate::types::SiteFeatures;

/// Linear combination of the site features; lower is a stronger prediction.
pub fn combined_score(model: &ScoreModel, f: &SiteFeatures) -> f64 {
    model.intercept
        + model.tgs_score * f.tgs_score
        + model.dg_total * f.dg_total
        + model.prob_exact * f.prob_exact
        + model.prob_binomial * f.prob_binomial
        + model.cons_bls * f.cons_bls
        + model.selec_phylop * f.selec_phylop
}
